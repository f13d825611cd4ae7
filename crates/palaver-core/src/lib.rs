// Messaging core: send/receive queueing, streaming coordination, and
// auto-scroll geometry, without UI dependencies.

pub mod config;
pub mod error;
pub mod host;
pub mod message;
pub mod resolvable;
pub mod scroll;
pub mod service;
pub mod types;

mod loading;

pub use config::MessagingConfig;
pub use error::{CancelReason, SendError, TransportError};
pub use host::{
    CommunicationReport, ConversationSink, ErrorReporter, HostBindings, HostErrorType,
    LifecycleEvent, LifecycleHooks, Transport, TransportContext,
};
pub use message::{
    ErrorState, InboundMessage, InputKind, MessageInput, MessageSource, OutboundMessage,
    RequestOptions, TrackData,
};
pub use resolvable::SendHandle;
pub use service::MessageService;
pub use types::{ItemId, MessageId, ResponseId};
