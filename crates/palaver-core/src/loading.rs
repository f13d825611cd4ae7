//! Combined loading-indicator/timeout timer for a single send attempt.

use std::future::pending;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

type EndCallback = Box<dyn FnOnce(bool) + Send>;

/// Runs two clocks against one attempt: after `loading_delay` the indicator
/// callback fires, and after `timeout` the attempt is cancelled with a
/// timeout reason. `end` stops both. The two delays are independent; a
/// timeout shorter than the indicator delay still fires on time.
pub(crate) struct LoadingTimer {
    stop: CancellationToken,
    shown: Arc<AtomicBool>,
    on_end: Mutex<Option<EndCallback>>,
}

impl LoadingTimer {
    pub fn start<S, E, T>(
        on_start: S,
        on_end: E,
        on_timeout: T,
        loading_delay: Duration,
        timeout: Duration,
    ) -> Self
    where
        S: FnOnce() + Send + 'static,
        E: FnOnce(bool) + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        let stop = CancellationToken::new();
        let shown = Arc::new(AtomicBool::new(false));

        let task_stop = stop.clone();
        let task_shown = shown.clone();
        tokio::spawn(async move {
            let show = async move {
                sleep(loading_delay).await;
                task_shown.store(true, Ordering::SeqCst);
                on_start();
                // Keep the arm alive so the select ends only on stop/timeout.
                pending::<()>().await;
            };
            tokio::select! {
                _ = task_stop.cancelled() => {}
                () = show => {}
                _ = sleep(timeout) => on_timeout(),
            }
        });

        Self {
            stop,
            shown,
            on_end: Mutex::new(Some(Box::new(on_end))),
        }
    }

    /// Stops both clocks and reports whether the indicator was shown.
    pub fn end(&self) {
        self.stop.cancel();
        let callback = self
            .on_end
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(on_end) = callback {
            on_end(self.shown.load(Ordering::SeqCst));
        }
    }
}

impl Drop for LoadingTimer {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
