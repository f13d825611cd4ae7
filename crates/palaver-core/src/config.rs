use serde::Deserialize;
use std::time::Duration;

/// Delay before the loading indicator is shown for a silent attempt.
pub const MS_MAX_SILENT_LOADING: u64 = 4_000;

/// Overall ceiling on a single send attempt.
pub const MS_MAX_ATTEMPT: u64 = 150_000;

/// Host-supplied messaging configuration. Timeouts are expressed in seconds
/// and fall back to the millisecond defaults above when absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagingConfig {
    #[serde(default)]
    pub message_timeout_secs: Option<u32>,
    #[serde(default)]
    pub silent_loading_secs: Option<u32>,
    /// Filled onto outbound messages that carry no locale of their own.
    #[serde(default)]
    pub locale: Option<String>,
    /// Filled onto outbound messages that carry no timezone of their own.
    #[serde(default)]
    pub timezone: Option<String>,
}

impl MessagingConfig {
    pub fn attempt_timeout(&self) -> Duration {
        self.message_timeout_secs
            .map_or(Duration::from_millis(MS_MAX_ATTEMPT), |secs| {
                Duration::from_secs(u64::from(secs))
            })
    }

    pub fn loading_delay(&self) -> Duration {
        self.silent_loading_secs
            .map_or(Duration::from_millis(MS_MAX_SILENT_LOADING), |secs| {
                Duration::from_secs(u64::from(secs))
            })
    }
}
