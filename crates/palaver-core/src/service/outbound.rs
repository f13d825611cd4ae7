//! One transport attempt per dispatch, and the settlement paths shared with
//! the cancellation logic.

use crate::config::MessagingConfig;
use crate::error::SendError;
use crate::host::{
    CommunicationReport, ConversationSink, ErrorReporter, HostErrorType, Transport,
    TransportContext,
};
use crate::message::{ErrorState, InboundMessage, OutboundMessage};
use crate::service::queue::PendingRequest;
use crate::types::MessageId;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

/// Queue access granted to the coordinator. It never holds a reference to
/// the queue itself; the service passes this accessor in, which keeps the
/// queue independently testable.
#[async_trait]
pub(crate) trait QueueHandle: Send + Sync {
    fn is_current(&self, id: &MessageId) -> bool;
    /// Clears the current slot and kicks the runner.
    fn advance_queue(&self);
    fn end_loading(&self);
    /// Drops the abort registry entry for a settled request.
    fn remove_abort(&self, id: &MessageId);
    async fn process_success(&self, request: &Arc<PendingRequest>, response: Option<InboundMessage>);
}

pub(crate) struct OutboundCoordinator {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ConversationSink>,
    reporter: Arc<dyn ErrorReporter>,
    config: MessagingConfig,
}

impl OutboundCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ConversationSink>,
        reporter: Arc<dyn ErrorReporter>,
        config: MessagingConfig,
    ) -> Self {
        Self {
            transport,
            sink,
            reporter,
            config,
        }
    }

    /// Performs exactly one transport attempt for `request`. Retries are the
    /// transport's responsibility.
    pub async fn dispatch(
        &self,
        request: &Arc<PendingRequest>,
        queue: &dyn QueueHandle,
        start_loading: Option<Box<dyn FnOnce() + Send>>,
    ) {
        if request.is_processed() {
            return;
        }

        // Fill locale/timezone on a clone and commit it back so the stored
        // payload matches what actually went over the wire.
        let message: OutboundMessage = {
            let mut guard = request.message.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if guard.locale.is_none() {
                guard.locale = self.config.locale.clone();
            }
            if guard.timezone.is_none() {
                guard.timezone = self.config.timezone.clone();
            }
            guard.clone()
        };
        self.sink.update_request(&message);

        request.stamp_last_request();
        if let Some(start) = start_loading {
            start();
        }

        let ctx = TransportContext {
            cancel: request.cancel.clone(),
            silent: request.options.silent,
            send_event: message.is_event(),
        };
        debug!(target: "palaver::outbound", id = %message.id, "dispatching transport attempt");

        match self.transport.send_message(&message, ctx).await {
            Ok(()) => queue.process_success(request, None).await,
            Err(err) => {
                let text = err.normalize();
                error!(target: "palaver::outbound", id = %message.id, error = %text, "transport attempt failed");
                self.process_error(request, text, queue);
            }
        }
    }

    /// Maps a failed attempt to service-level effects.
    pub fn process_error(&self, request: &Arc<PendingRequest>, result_text: String, queue: &dyn QueueHandle) {
        if request.is_processed() {
            return;
        }
        request.record_error();

        // A silent send has no visible bubble to carry the error state, so
        // the failure gets its own inline message.
        if request.options.silent {
            self.sink.insert_local_error(&result_text);
        }
        self.reporter.report(CommunicationReport {
            error_type: HostErrorType::MessageCommunication,
            message: result_text.clone(),
            other_data: None,
        });

        self.reject_final_error(request, SendError::Failed(result_text), queue);
    }

    /// Terminal rejection path: FAILED error state, loading torn down when
    /// the request is current, handle rejected, queue advanced.
    pub fn reject_final_error(&self, request: &Arc<PendingRequest>, error: SendError, queue: &dyn QueueHandle) {
        self.sink
            .set_error_state(&request.local_message_id, ErrorState::Failed);
        let was_current = queue.is_current(&request.id());
        if was_current && !request.is_event() {
            queue.end_loading();
        }
        let settled = request.try_settle(Err(error));
        // The registry entry must not outlive the settlement.
        queue.remove_abort(&request.id());
        if settled && was_current {
            queue.advance_queue();
        }
    }

    /// Terminal resolution path for explicit cancellation: the handle
    /// resolves rather than rejects.
    pub fn resolve_cancelled(&self, request: &Arc<PendingRequest>, queue: &dyn QueueHandle) {
        self.sink
            .set_error_state(&request.local_message_id, ErrorState::None);
        let was_current = queue.is_current(&request.id());
        if was_current && !request.is_event() {
            queue.end_loading();
        }
        let settled = request.try_settle(Ok(()));
        queue.remove_abort(&request.id());
        if settled && was_current {
            queue.advance_queue();
        }
    }
}
