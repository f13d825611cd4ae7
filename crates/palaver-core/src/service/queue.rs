use crate::error::SendError;
use crate::message::{InboundMessage, MessageSource, OutboundMessage, RequestOptions, TrackData};
use crate::resolvable::{SendHandle, Settler, send_channel};
use crate::types::MessageId;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// A queued or in-flight unit of outbound work with an associated
/// caller-visible promise.
///
/// `processed` is the sole idempotence guard: it flips false→true exactly
/// once, inside the same critical section that consumes the settler, so no
/// resolution path can double-settle the caller's handle.
pub struct PendingRequest {
    pub local_message_id: MessageId,
    pub source: MessageSource,
    pub options: RequestOptions,
    /// Created at enqueue time, not dispatch time, so cancellation is
    /// possible while the request is still waiting.
    pub cancel: CancellationToken,
    pub message: Mutex<OutboundMessage>,
    state: Mutex<PendingState>,
}

struct PendingState {
    processed: bool,
    streaming: bool,
    settler: Settler,
    enqueued_at: Instant,
    time_first_request: Option<Instant>,
    time_last_request: Option<Instant>,
    last_response: Option<InboundMessage>,
    track: TrackData,
}

impl PendingRequest {
    pub fn new(
        message: OutboundMessage,
        source: MessageSource,
        local_message_id: MessageId,
        options: RequestOptions,
    ) -> (Arc<Self>, SendHandle) {
        let (settler, handle) = send_channel();
        let request = Arc::new(Self {
            local_message_id,
            source,
            options,
            cancel: CancellationToken::new(),
            message: Mutex::new(message),
            state: Mutex::new(PendingState {
                processed: false,
                streaming: false,
                settler,
                enqueued_at: Instant::now(),
                time_first_request: None,
                time_last_request: None,
                last_response: None,
                track: TrackData::default(),
            }),
        });
        (request, handle)
    }

    fn state(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> MessageId {
        self.message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .id
            .clone()
    }

    pub fn is_event(&self) -> bool {
        self.message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_event()
    }

    pub fn is_processed(&self) -> bool {
        self.state().processed
    }

    pub fn is_streaming(&self) -> bool {
        self.state().streaming
    }

    pub fn set_streaming(&self, streaming: bool) {
        self.state().streaming = streaming;
    }

    /// Stamped when the request leaves the waiting list.
    pub fn stamp_first_request(&self) {
        let mut state = self.state();
        let now = Instant::now();
        let elapsed = now.duration_since(state.enqueued_at);
        state.time_first_request.get_or_insert(now);
        state.track.time_to_dispatch.get_or_insert(elapsed);
    }

    /// Stamped at each transport dispatch.
    pub fn stamp_last_request(&self) {
        self.state().time_last_request = Some(Instant::now());
    }

    pub fn record_response(&self, response: InboundMessage) {
        self.state().last_response = Some(response);
    }

    pub fn last_response(&self) -> Option<InboundMessage> {
        self.state().last_response.clone()
    }

    pub fn record_error(&self) {
        self.state().track.error_count += 1;
    }

    pub fn track(&self) -> TrackData {
        self.state().track
    }

    /// Settles the caller's handle exactly once. The processed check and the
    /// flip happen under one lock acquisition; a loser of the race observes
    /// false and must not mutate further state.
    pub fn try_settle(&self, outcome: Result<(), SendError>) -> bool {
        let mut state = self.state();
        if state.processed {
            return false;
        }
        state.processed = true;
        let elapsed = state.enqueued_at.elapsed();
        state.track.time_to_settle.get_or_insert(elapsed);
        state.settler.settle(outcome)
    }
}

/// The request queue: strict FIFO waiting list plus at most one current
/// (in-flight) request. Owned exclusively by the message service.
#[derive(Default)]
pub struct MessageQueue {
    pub waiting: VecDeque<Arc<PendingRequest>>,
    pub current: Option<Arc<PendingRequest>>,
}

impl MessageQueue {
    pub fn is_current(&self, id: &MessageId) -> bool {
        self.current.as_ref().is_some_and(|current| {
            current.id() == *id || current.local_message_id == *id
        })
    }

    /// Splices a waiting request out by request id or local id.
    pub fn remove_waiting(&mut self, id: &str) -> Option<Arc<PendingRequest>> {
        let index = self.waiting.iter().position(|request| {
            request.id().as_str() == id || request.local_message_id.as_str() == id
        })?;
        self.waiting.remove(index)
    }
}
