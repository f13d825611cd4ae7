//! The message send/receive queue: single-flight FIFO dispatch, lifecycle
//! hooks, loading/timeout management, cooperative cancellation, and
//! streaming-aware queue advancement.

pub mod queue;
pub mod streaming;

mod outbound;

#[cfg(test)]
mod tests;

use crate::config::MessagingConfig;
use crate::error::{CancelReason, SendError};
use crate::host::{
    CommunicationReport, ConversationSink, ErrorReporter, HostBindings, HostErrorType,
    LifecycleEvent, LifecycleHooks,
};
use crate::loading::LoadingTimer;
use crate::message::{ErrorState, InboundMessage, InputKind, MessageSource, OutboundMessage, RequestOptions};
use crate::resolvable::SendHandle;
use crate::types::{ItemId, MessageId, ResponseId};
use async_trait::async_trait;
use chrono::Utc;
use outbound::{OutboundCoordinator, QueueHandle};
use queue::{MessageQueue, PendingRequest};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use streaming::StreamingCoordinator;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Single entry point for sending a message and for cancelling any message:
/// current, waiting, or already-dequeued-but-streaming.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct MessageService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    weak: Weak<ServiceInner>,
    config: MessagingConfig,
    outbound: OutboundCoordinator,
    streaming: StreamingCoordinator,
    sink: Arc<dyn ConversationSink>,
    hooks: Arc<dyn LifecycleHooks>,
    reporter: Arc<dyn ErrorReporter>,
    queue: Mutex<MessageQueue>,
    /// Abort handles keyed independently of queue membership: an entry
    /// outlives its request's queue slot while that request streams, and is
    /// removed only on finalize or cancel.
    aborts: Mutex<HashMap<MessageId, CancellationToken>>,
    loading: Mutex<Option<LoadingTimer>>,
    /// Lets streaming chunks whose response id differs from the original
    /// request id correlate back to the turn that was just processed.
    last_processed: Mutex<Option<MessageId>>,
}

enum CancelTarget {
    Current(Arc<PendingRequest>),
    Waiting(Arc<PendingRequest>),
}

impl MessageService {
    pub fn new(bindings: HostBindings, config: MessagingConfig) -> Self {
        let inner = Arc::new_cyclic(|weak| ServiceInner {
            weak: weak.clone(),
            outbound: OutboundCoordinator::new(
                bindings.transport.clone(),
                bindings.sink.clone(),
                bindings.reporter.clone(),
                config.clone(),
            ),
            streaming: StreamingCoordinator::default(),
            sink: bindings.sink,
            hooks: bindings.hooks,
            reporter: bindings.reporter,
            config,
            queue: Mutex::new(MessageQueue::default()),
            aborts: Mutex::new(HashMap::new()),
            loading: Mutex::new(None),
            last_processed: Mutex::new(None),
        });
        Self { inner }
    }

    /// Enqueues a message and returns a handle the caller can await for the
    /// terminal outcome. Never fails synchronously; failures surface only
    /// through the handle.
    ///
    /// Must be called within a tokio runtime: the queue runner is a spawned
    /// task.
    pub fn send(
        &self,
        mut message: OutboundMessage,
        source: MessageSource,
        local_message_id: Option<MessageId>,
        options: RequestOptions,
    ) -> SendHandle {
        if message.timestamp.is_none() {
            message.timestamp = Some(Utc::now());
        }
        if message.input.kind.is_none() {
            message.input.kind = Some(InputKind::Text);
        }
        let id = message.id.clone();
        let local_message_id = local_message_id.unwrap_or_else(|| id.clone());

        let (request, handle) = PendingRequest::new(message, source, local_message_id, options);
        self.inner
            .lock_aborts()
            .insert(id.clone(), request.cancel.clone());
        self.inner.lock_queue().waiting.push_back(request);
        debug!(target: "palaver::service", id = %id, "request enqueued");

        self.inner.kick();
        handle
    }

    /// Drains the waiting list and cancels the current request. Used on
    /// conversation restart.
    pub fn cancel_all(&self, reason: CancelReason) {
        self.inner.cancel_all(reason);
    }

    /// Cancels whichever request is active, preferring a tracked streaming
    /// id over the nominal current queue slot.
    pub fn cancel_current(&self, reason: CancelReason) {
        self.inner.cancel_current(reason);
    }

    /// General-purpose cancellation primitive. `id` may be an original
    /// request id, a streaming response id, or an item id.
    pub fn cancel_by_id(&self, id: &str, log_error: bool, reason: CancelReason) {
        self.inner.cancel_by_id(id, log_error, reason);
    }

    /// Marks the current request as streaming and records the alias mapping
    /// used by chunk-driven finalize/cancel calls.
    pub fn mark_streaming(&self, response_id: Option<ResponseId>, item_id: Option<ItemId>) {
        self.inner.mark_streaming(response_id, item_id);
    }

    /// Called when a terminal chunk arrives: clears tracking and advances
    /// the queue.
    pub fn finalize_stream(&self, id: &str) {
        self.inner.finalize_stream(id);
    }

    /// Delivers an atomic response (or the head of a stream) for the current
    /// request.
    pub async fn handle_response(&self, response: InboundMessage) {
        self.inner.handle_response(response).await;
    }

    pub fn streaming_message_id(&self) -> Option<ResponseId> {
        self.inner.streaming.streaming_message_id()
    }

    pub fn current_request_id(&self) -> Option<MessageId> {
        self.inner
            .lock_queue()
            .current
            .as_ref()
            .map(|request| request.id())
    }

    pub fn waiting_len(&self) -> usize {
        self.inner.lock_queue().waiting.len()
    }
}

impl ServiceInner {
    fn lock_queue(&self) -> MutexGuard<'_, MessageQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_aborts(&self) -> MutexGuard<'_, HashMap<MessageId, CancellationToken>> {
        self.aborts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_loading(&self) -> MutexGuard<'_, Option<LoadingTimer>> {
        self.loading.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_last_processed(&self) -> MutexGuard<'_, Option<MessageId>> {
        self.last_processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn kick(&self) {
        let Some(inner) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move { inner.run_queue_if_ready().await });
    }

    fn advance(&self) {
        self.lock_queue().current = None;
        self.kick();
    }

    fn end_loading_timer(&self) {
        if let Some(timer) = self.lock_loading().take() {
            timer.end();
        }
    }

    /// The queue runner: at most one outbound attempt in progress at a time,
    /// strict FIFO order preserved.
    async fn run_queue_if_ready(self: Arc<Self>) {
        let request = {
            let mut queue = self.lock_queue();
            if queue.current.is_some() || queue.waiting.is_empty() {
                return;
            }
            let Some(request) = queue.waiting.pop_front() else {
                return;
            };
            queue.current = Some(request.clone());
            request
        };
        request.stamp_first_request();
        debug!(target: "palaver::service", id = %request.id(), "request is now current");

        if request.is_event() {
            // Events are not user-visible turns: no lifecycle hooks, no
            // optimistic commit, no loading or timeout.
            self.outbound.dispatch(&request, self.as_ref(), None).await;
            return;
        }

        let message = request
            .message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        self.hooks
            .fire(LifecycleEvent::PreSend {
                message: message.clone(),
                source: request.source,
            })
            .await;
        if request.is_processed() {
            debug!(target: "palaver::service", id = %request.id(), "cancelled during pre-send hook");
            return;
        }

        if !request.options.silent {
            self.sink.commit_request(&message, request.source);
        }

        self.hooks
            .fire(LifecycleEvent::Send {
                message,
                source: request.source,
            })
            .await;
        if request.is_processed() {
            debug!(target: "palaver::service", id = %request.id(), "cancelled during send hook");
            return;
        }

        let start_loading: Box<dyn FnOnce() + Send> = {
            let weak = Arc::downgrade(&self);
            let id = request.id();
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.arm_loading(&id);
                }
            })
        };
        self.outbound
            .dispatch(&request, self.as_ref(), Some(start_loading))
            .await;
    }

    fn arm_loading(&self, id: &MessageId) {
        let sink_start = self.sink.clone();
        let sink_end = self.sink.clone();
        let weak = self.weak.clone();
        let id = id.clone();
        let timer = LoadingTimer::start(
            move || sink_start.loading_started(),
            move |did_exceed_max| sink_end.loading_ended(did_exceed_max),
            move || {
                if let Some(inner) = weak.upgrade() {
                    warn!(target: "palaver::service", id = %id, "send attempt timed out");
                    inner.cancel_by_id(id.as_str(), true, CancelReason::Timeout);
                }
            },
            self.config.loading_delay(),
            self.config.attempt_timeout(),
        );
        if let Some(previous) = self.lock_loading().replace(timer) {
            previous.end();
        }
    }

    /// Maps a successful transport attempt (or a delivered response) to
    /// service-level effects. Idempotent against concurrent cancellation.
    async fn process_success(&self, request: &Arc<PendingRequest>, response: Option<InboundMessage>) {
        if request.is_processed() {
            return;
        }
        self.sink
            .set_error_state(&request.local_message_id, ErrorState::None);

        if let Some(mut response) = response {
            if !request.is_event() {
                if response.received_at.is_none() {
                    response.received_at = Some(Utc::now());
                }
                request.record_response(response.clone());
                self.sink.receive(&response).await;
            }
        }

        self.end_loading_timer();

        // A cancellation may have landed during the receive await; the
        // settle below re-checks and flips `processed` in one critical
        // section, so at most one resolution path wins.
        if !request.try_settle(Ok(())) {
            return;
        }
        *self.lock_last_processed() = Some(request.id());

        if request.is_streaming() {
            // The turn being tracked is now the processed one; stop aliasing
            // the previous turn's id to it.
            self.streaming.record_processed(&request.id());
            // Completion of the transport call does not complete the logical
            // turn: the queue stays occupied until finalize_stream.
            debug!(
                target: "palaver::service",
                id = %request.id(),
                "attempt complete; holding queue for stream finalization"
            );
        } else {
            self.lock_aborts().remove(&request.id());
            self.sink.set_stop_streaming_visible(false);
            self.advance();
        }
    }

    fn mark_streaming(&self, response_id: Option<ResponseId>, item_id: Option<ItemId>) {
        let current = self.lock_queue().current.clone();
        let Some(current) = current else {
            warn!(target: "palaver::service", "mark_streaming with no in-flight request");
            return;
        };
        current.set_streaming(true);
        let last_processed = self.lock_last_processed().clone();
        debug!(
            target: "palaver::service",
            id = %current.id(),
            response_id = response_id.as_ref().map(ResponseId::as_str),
            item_id = item_id.as_ref().map(ItemId::as_str),
            "tracking streaming turn"
        );
        self.streaming.track(
            current.id(),
            current.cancel.clone(),
            response_id,
            item_id,
            last_processed,
        );
    }

    fn finalize_stream(&self, id: &str) {
        let Some(meta) = self.streaming.clear(id) else {
            debug!(target: "palaver::service", id, "finalize for untracked stream");
            return;
        };
        self.lock_aborts().remove(&meta.request_id);
        self.sink.set_stop_streaming_visible(false);

        let was_current = {
            let mut queue = self.lock_queue();
            if queue
                .current
                .as_ref()
                .is_some_and(|current| current.id() == meta.request_id)
            {
                queue.current = None;
                true
            } else {
                false
            }
        };
        if was_current {
            self.kick();
        }
    }

    async fn handle_response(&self, response: InboundMessage) {
        let current = self.lock_queue().current.clone();
        let Some(current) = current else {
            debug!(target: "palaver::service", response_id = %response.response_id, "response with no in-flight request");
            return;
        };
        if response.streaming {
            self.mark_streaming(Some(response.response_id.clone()), response.item_id.clone());
        }
        self.process_success(&current, Some(response)).await;
    }

    fn cancel_all(&self, reason: CancelReason) {
        let waiting: Vec<String> = self
            .lock_queue()
            .waiting
            .iter()
            .map(|request| request.id().as_str().to_string())
            .collect();
        for id in waiting {
            self.cancel_by_id(&id, false, reason);
        }
        self.cancel_current(reason);
    }

    fn cancel_current(&self, reason: CancelReason) {
        // A streaming request may already be logically dequeued; prefer its
        // tracked id over the nominal current slot.
        let id = self
            .streaming
            .streaming_message_id()
            .map(|response_id| response_id.as_str().to_string())
            .or_else(|| {
                self.lock_queue()
                    .current
                    .as_ref()
                    .map(|current| current.id().as_str().to_string())
            });
        if let Some(id) = id {
            self.cancel_by_id(&id, false, reason);
        }
    }

    fn cancel_by_id(&self, id: &str, log_error: bool, reason: CancelReason) {
        let canonical = self.streaming.resolve_id(id);

        let target = {
            let mut queue = self.lock_queue();
            if let Some(current) = queue.current.clone() {
                let direct =
                    current.id().as_str() == id || current.local_message_id.as_str() == id;
                let via_alias = canonical
                    .as_ref()
                    .and_then(|key| self.streaming.meta_for(key))
                    .is_some_and(|meta| meta.request_id == current.id());
                if direct || via_alias {
                    Some(CancelTarget::Current(current))
                } else if current.is_streaming() {
                    // Preserved source behavior: while a streaming turn is in
                    // flight, any cancellation id names that turn.
                    Some(CancelTarget::Current(current))
                } else {
                    queue.remove_waiting(id).map(CancelTarget::Waiting)
                }
            } else {
                queue.remove_waiting(id).map(CancelTarget::Waiting)
            }
        };

        let Some(target) = target else {
            debug!(target: "palaver::service", id, "no pending request matched cancellation");
            return;
        };
        let request = match target {
            CancelTarget::Current(request) | CancelTarget::Waiting(request) => request,
        };
        let was_streaming = request.is_streaming();
        if request.is_processed() && !was_streaming {
            return;
        }

        // Signal the abort handle before any settlement so the transport
        // callback can observe the cancellation.
        match self.lock_aborts().remove(&request.id()) {
            Some(token) => token.cancel(),
            None => request.cancel.cancel(),
        }
        self.streaming.clear_for_request(&request.id());
        debug!(target: "palaver::service", id = %request.id(), %reason, "cancelling request");

        match reason {
            CancelReason::Timeout => {
                if log_error {
                    let other_data = request
                        .last_response()
                        .and_then(|response| serde_json::to_value(response).ok());
                    self.reporter.report(CommunicationReport {
                        error_type: HostErrorType::MessageCommunication,
                        message: format!("Request {} exceeded the configured timeout", request.id()),
                        other_data,
                    });
                }
                self.outbound
                    .reject_final_error(&request, SendError::Cancelled { reason }, self);
            }
            _ if was_streaming => {
                // The stream-stopped indicator already tells the user; no
                // synthetic cancellation notice for an in-progress stream.
                self.sink.set_stop_streaming_visible(false);
                let is_current = self.lock_queue().is_current(&request.id());
                if is_current {
                    self.end_loading_timer();
                }
                let _ = request.try_settle(Ok(()));
                if is_current {
                    self.advance();
                }
            }
            _ => {
                // The request never began streaming: without a notice the
                // user has no indication it was dropped.
                self.sink
                    .insert_cancellation_notice(&request.local_message_id);
                self.outbound.resolve_cancelled(&request, self);
            }
        }
    }
}

#[async_trait]
impl QueueHandle for ServiceInner {
    fn is_current(&self, id: &MessageId) -> bool {
        self.lock_queue().is_current(id)
    }

    fn advance_queue(&self) {
        self.advance();
    }

    fn end_loading(&self) {
        self.end_loading_timer();
    }

    fn remove_abort(&self, id: &MessageId) {
        self.lock_aborts().remove(id);
    }

    async fn process_success(&self, request: &Arc<PendingRequest>, response: Option<InboundMessage>) {
        ServiceInner::process_success(self, request, response).await;
    }
}
