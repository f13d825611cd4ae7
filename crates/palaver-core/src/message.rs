use crate::types::{ItemId, MessageId, ResponseId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What kind of turn an outbound message represents. Event messages are
/// host-to-backend signals, not user-visible chat turns, and bypass the
/// pre-send/send lifecycle and the loading indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Text,
    Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageInput {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<InputKind>,
}

/// The outbound request payload handed to the host transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: MessageId,
    pub input: MessageInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl OutboundMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            input: MessageInput {
                text: text.into(),
                kind: Some(InputKind::Text),
            },
            timestamp: None,
            locale: None,
            timezone: None,
        }
    }

    pub fn event(text: impl Into<String>) -> Self {
        let mut message = Self::new(text);
        message.input.kind = Some(InputKind::Event);
        message
    }

    pub fn is_event(&self) -> bool {
        matches!(self.input.kind, Some(InputKind::Event))
    }
}

/// An inbound response, atomic or the head of a chunked stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub response_id: ResponseId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemId>,
    pub output: String,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

/// Origin of a send call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    UserInput,
    Programmatic,
}

/// Caller-supplied flags for a single send.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Silent sends render no user-message bubble; failures for them
    /// synthesize an inline error so they are still observable.
    pub silent: bool,
}

/// Per-message error state rendered by the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorState {
    #[default]
    None,
    Waiting,
    Failed,
}

/// Cumulative timing and error counters for telemetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackData {
    /// Time from enqueue to the first dispatch attempt.
    pub time_to_dispatch: Option<Duration>,
    /// Time from enqueue to terminal settlement.
    pub time_to_settle: Option<Duration>,
    pub error_count: u32,
}
