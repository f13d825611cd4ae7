use strum_macros::Display;
use thiserror::Error;

/// Fixed fallback when a transport error carries no usable text.
pub const DEFAULT_TRANSPORT_ERROR_TEXT: &str = "The message could not be sent.";

/// Why a pending request was cancelled. Timeout is a delayed cancellation
/// with a distinguished reason, not a separate mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CancelReason {
    Timeout,
    UserCancelled,
    ConversationRestart,
}

/// Terminal outcome surfaced through the handle returned by
/// [`MessageService::send`](crate::service::MessageService::send).
///
/// Explicit cancellation resolves the handle instead of rejecting it; only
/// timeouts and transport failures reject.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("Message was cancelled ({reason})")]
    Cancelled { reason: CancelReason },
    #[error("{0}")]
    Failed(String),
    #[error("message service dropped before the request settled")]
    ServiceDropped,
}

/// Error returned by the host transport callback.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0}")]
    Message(String),
    #[error("transport returned a structured error")]
    Payload(serde_json::Value),
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// Normalizes the error to display text: string passthrough, else
    /// JSON stringification, else a fixed fallback.
    pub fn normalize(&self) -> String {
        let text = match self {
            TransportError::Message(text) => text.clone(),
            TransportError::Payload(value) => {
                serde_json::to_string(value).unwrap_or_default()
            }
            TransportError::Other(err) => err.to_string(),
        };
        if text.is_empty() {
            DEFAULT_TRANSPORT_ERROR_TEXT.to_string()
        } else {
            text
        }
    }
}
