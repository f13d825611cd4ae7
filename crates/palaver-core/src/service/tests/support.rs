//! Scripted host fakes shared by the service tests.

use crate::config::MessagingConfig;
use crate::error::TransportError;
use crate::host::{
    CommunicationReport, ConversationSink, ErrorReporter, HostBindings, LifecycleEvent,
    LifecycleHooks, Transport, TransportContext,
};
use crate::message::{ErrorState, InboundMessage, MessageSource, OutboundMessage};
use crate::service::MessageService;
use crate::types::MessageId;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// What the fake transport does with the next dispatched message. Defaults
/// to `Succeed` when the script runs dry.
#[derive(Debug, Clone, Copy)]
pub enum TransportBehavior {
    Succeed,
    Fail(&'static str),
    /// Pends until `FakeTransport::release` or cancellation, then succeeds.
    HoldUntilReleased,
    /// Pends until the attempt's cancel token fires, then succeeds. Models a
    /// backend that never answers.
    WaitForCancel,
    /// Succeeds after a timed delay. Useful for racing against the attempt
    /// timeout under a paused clock.
    SucceedAfter(Duration),
}

#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<VecDeque<TransportBehavior>>,
    release: Notify,
    pub dispatched: Mutex<Vec<MessageId>>,
    pub cancel_tokens: Mutex<Vec<CancellationToken>>,
}

impl FakeTransport {
    pub fn script(&self, behaviors: impl IntoIterator<Item = TransportBehavior>) {
        self.script.lock().unwrap().extend(behaviors);
    }

    /// Lets exactly one held attempt complete.
    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn dispatched_ids(&self) -> Vec<MessageId> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_message(
        &self,
        message: &OutboundMessage,
        ctx: TransportContext,
    ) -> Result<(), TransportError> {
        self.dispatched.lock().unwrap().push(message.id.clone());
        self.cancel_tokens.lock().unwrap().push(ctx.cancel.clone());
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TransportBehavior::Succeed);

        match behavior {
            TransportBehavior::Succeed => Ok(()),
            TransportBehavior::Fail(text) => Err(TransportError::Message(text.to_string())),
            TransportBehavior::HoldUntilReleased => {
                tokio::select! {
                    () = ctx.cancel.cancelled() => Ok(()),
                    () = self.release.notified() => Ok(()),
                }
            }
            TransportBehavior::WaitForCancel => {
                ctx.cancel.cancelled().await;
                Ok(())
            }
            TransportBehavior::SucceedAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingEvent {
    Started,
    Ended { did_exceed_max: bool },
}

#[derive(Default)]
pub struct FakeSink {
    pub committed: Mutex<Vec<MessageId>>,
    pub updated: Mutex<Vec<OutboundMessage>>,
    pub received: Mutex<Vec<InboundMessage>>,
    pub error_states: Mutex<Vec<(MessageId, ErrorState)>>,
    pub cancellation_notices: Mutex<Vec<MessageId>>,
    pub local_errors: Mutex<Vec<String>>,
    pub stop_streaming: Mutex<Vec<bool>>,
    pub loading: Mutex<Vec<LoadingEvent>>,
}

impl FakeSink {
    pub fn committed_ids(&self) -> Vec<MessageId> {
        self.committed.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<MessageId> {
        self.cancellation_notices.lock().unwrap().clone()
    }

    pub fn last_error_state(&self, id: &MessageId) -> Option<ErrorState> {
        self.error_states
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(state_id, _)| state_id == id)
            .map(|(_, state)| *state)
    }

    pub fn loading_events(&self) -> Vec<LoadingEvent> {
        self.loading.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationSink for FakeSink {
    fn commit_request(&self, message: &OutboundMessage, _source: MessageSource) {
        self.committed.lock().unwrap().push(message.id.clone());
    }

    fn update_request(&self, message: &OutboundMessage) {
        self.updated.lock().unwrap().push(message.clone());
    }

    async fn receive(&self, response: &InboundMessage) {
        self.received.lock().unwrap().push(response.clone());
    }

    fn set_error_state(&self, id: &MessageId, state: ErrorState) {
        self.error_states.lock().unwrap().push((id.clone(), state));
    }

    fn insert_cancellation_notice(&self, id: &MessageId) {
        self.cancellation_notices.lock().unwrap().push(id.clone());
    }

    fn insert_local_error(&self, text: &str) {
        self.local_errors.lock().unwrap().push(text.to_string());
    }

    fn set_stop_streaming_visible(&self, visible: bool) {
        self.stop_streaming.lock().unwrap().push(visible);
    }

    fn loading_started(&self) {
        self.loading.lock().unwrap().push(LoadingEvent::Started);
    }

    fn loading_ended(&self, did_exceed_max: bool) {
        self.loading
            .lock()
            .unwrap()
            .push(LoadingEvent::Ended { did_exceed_max });
    }
}

#[derive(Default)]
pub struct FakeHooks {
    pub fired: Mutex<Vec<LifecycleEvent>>,
}

#[async_trait]
impl LifecycleHooks for FakeHooks {
    async fn fire(&self, event: LifecycleEvent) {
        self.fired.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct FakeReporter {
    pub reports: Mutex<Vec<CommunicationReport>>,
}

impl ErrorReporter for FakeReporter {
    fn report(&self, report: CommunicationReport) {
        self.reports.lock().unwrap().push(report);
    }
}

pub struct Harness {
    pub service: MessageService,
    pub transport: Arc<FakeTransport>,
    pub sink: Arc<FakeSink>,
    pub hooks: Arc<FakeHooks>,
    pub reporter: Arc<FakeReporter>,
}

pub fn harness() -> Harness {
    harness_with_config(MessagingConfig::default())
}

pub fn harness_with_config(config: MessagingConfig) -> Harness {
    let transport = Arc::new(FakeTransport::default());
    let sink = Arc::new(FakeSink::default());
    let hooks = Arc::new(FakeHooks::default());
    let reporter = Arc::new(FakeReporter::default());
    let bindings = HostBindings {
        transport: transport.clone(),
        sink: sink.clone(),
        hooks: hooks.clone(),
        reporter: reporter.clone(),
    };
    Harness {
        service: MessageService::new(bindings, config),
        transport,
        sink,
        hooks,
        reporter,
    }
}

/// Lets spawned queue-runner tasks make progress. Uses a short paused-clock
/// sleep so pending timers do not advance meaningfully.
pub async fn drain() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
