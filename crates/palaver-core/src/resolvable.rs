//! Resolvable-promise primitive: the service holds the [`Settler`], the
//! caller awaits the paired [`SendHandle`].

use crate::error::SendError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

pub(crate) type SendOutcome = Result<(), SendError>;

/// Future returned by `MessageService::send`. Resolves when the request
/// settles; never panics if the service is dropped first.
#[derive(Debug)]
pub struct SendHandle {
    rx: oneshot::Receiver<SendOutcome>,
}

#[derive(Debug)]
pub(crate) struct Settler {
    tx: Option<oneshot::Sender<SendOutcome>>,
}

pub(crate) fn send_channel() -> (Settler, SendHandle) {
    let (tx, rx) = oneshot::channel();
    (Settler { tx: Some(tx) }, SendHandle { rx })
}

impl Settler {
    /// Settles at most once. Returns false if the outcome was already set.
    pub fn settle(&mut self, outcome: SendOutcome) -> bool {
        match self.tx.take() {
            Some(tx) => {
                // The caller may have dropped the handle; that is fine.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

impl Future for SendHandle {
    type Output = SendOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SendError::ServiceDropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}
