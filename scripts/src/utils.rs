//! Utilities for the deploy scripts: bounded waits, backoff and cancellation.

use std::{future::Future, time::Duration};

use tokio::{
    sync::watch,
    time::{sleep, timeout, Instant},
};
use tracing::debug;

use crate::errors::ScriptError;

/// Exponential backoff bounded by an overall deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first probe, doubled on every retry
    pub initial_delay: Duration,
    /// Upper bound of a single delay
    pub max_delay: Duration,
    /// Total time budget of the poll
    pub timeout: Duration,
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, timeout: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            timeout,
        }
    }

    /// Delay to wait before the given (zero based) attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1_u32 << attempt.min(16);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Receiving side of a cancellation signal, cheap to clone
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

/// Triggering side of a cancellation signal
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Build a linked cancellation pair
pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancellation { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Nobody listening anymore is fine
        let _ = self.tx.send(true);
    }
}

impl Cancellation {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the paired handle cancelled, never if it was dropped first
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Await `fut`, giving up after `limit` or when `cancel` fires
pub async fn with_deadline<T, F>(
    cancel: &Cancellation,
    limit: Duration,
    what: &str,
    fut: F,
) -> Result<T, ScriptError>
where
    F: Future<Output = Result<T, ScriptError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScriptError::Cancelled(format!("while {}", what))),
        res = timeout(limit, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(ScriptError::Timeout(format!("after {:?} while {}", limit, what))),
        },
    }
}

/// Repeatedly run `probe` with exponential backoff until it yields a value.
///
/// The first probe only runs after the initial delay. Errors from the probe are
/// returned as is, running out of time yields [`ScriptError::Timeout`].
pub async fn poll_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    cancel: &Cancellation,
    what: &str,
    mut probe: F,
) -> Result<T, ScriptError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ScriptError>>,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempt = 0;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(ScriptError::Timeout(format!(
                "after {:?} while {}",
                policy.timeout, what
            )));
        }

        let wait = policy.delay_for(attempt).min(deadline - now);
        debug!("Waiting {:?} before {} (attempt {})", wait, what, attempt + 1);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ScriptError::Cancelled(format!("while {}", what)));
            }
            _ = sleep(wait) => {}
        }

        if let Some(value) = probe().await? {
            return Ok(value);
        }
        attempt += 1;
    }
}
