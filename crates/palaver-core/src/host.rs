//! Contracts the messaging core consumes from the host application. The
//! rendering tree, the shared conversation store, and the event bus live
//! outside this crate; the core only sees them through these traits.

use crate::error::TransportError;
use crate::message::{ErrorState, InboundMessage, MessageSource, OutboundMessage};
use crate::types::MessageId;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-attempt context handed to the transport alongside the message.
#[derive(Debug, Clone)]
pub struct TransportContext {
    /// Cooperative cancellation: the transport is expected to observe this
    /// token; nothing forcibly unwinds an in-flight call.
    pub cancel: CancellationToken,
    pub silent: bool,
    pub send_event: bool,
}

/// Host-supplied function that performs the actual network call. Retries are
/// the transport's own responsibility; the core makes exactly one attempt
/// per dispatch.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(
        &self,
        message: &OutboundMessage,
        ctx: TransportContext,
    ) -> Result<(), TransportError>;
}

/// Mutation surface of the shared conversation state. Implementations
/// typically dispatch into the host's store.
#[async_trait]
pub trait ConversationSink: Send + Sync {
    /// Commits the optimistic user message before the transport attempt.
    fn commit_request(&self, message: &OutboundMessage, source: MessageSource);

    /// Replaces the stored request payload after pre-transmission fill-in
    /// (locale, timezone).
    fn update_request(&self, message: &OutboundMessage);

    /// Merges a response into the message list. Awaited by the core.
    async fn receive(&self, response: &InboundMessage);

    fn set_error_state(&self, id: &MessageId, state: ErrorState);

    /// Renders a visible "request cancelled" notice for a request that was
    /// dropped before it began streaming.
    fn insert_cancellation_notice(&self, id: &MessageId);

    /// Renders an inline error with no originating bubble (silent sends).
    fn insert_local_error(&self, text: &str);

    fn set_stop_streaming_visible(&self, visible: bool);

    fn loading_started(&self);

    fn loading_ended(&self, did_exceed_max: bool);
}

/// Lifecycle events fired around a send. Both are fully awaited; handlers
/// may cancel the message through the service's public API during the await.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    PreSend {
        message: OutboundMessage,
        source: MessageSource,
    },
    Send {
        message: OutboundMessage,
        source: MessageSource,
    },
}

#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    async fn fire(&self, event: LifecycleEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostErrorType {
    MessageCommunication,
}

#[derive(Debug, Clone)]
pub struct CommunicationReport {
    pub error_type: HostErrorType,
    pub message: String,
    pub other_data: Option<serde_json::Value>,
}

pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: CommunicationReport);
}

/// Aggregate of the host collaborators, cloned into the coordinators.
#[derive(Clone)]
pub struct HostBindings {
    pub transport: Arc<dyn Transport>,
    pub sink: Arc<dyn ConversationSink>,
    pub hooks: Arc<dyn LifecycleHooks>,
    pub reporter: Arc<dyn ErrorReporter>,
}
