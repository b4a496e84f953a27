//! Bounded polling and retry.
//!
//! The platform applies mutations and translations asynchronously, so the
//! engine waits for them with a [`RetryPolicy`]: exponential backoff from
//! `initial_delay`, capped at `max_delay`, giving up after `timeout`.
//! [`wait_until`] is the only place the workflow thread sleeps.
use crate::error::{ExportError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Microversion waits: 500ms doubling to 5s, 30s overall.
    pub const fn microversion() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
        }
    }

    /// Translation polling uses the same backoff with a longer deadline.
    pub const fn translation() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }

    /// Transient request retries.
    pub const fn network() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            timeout: Duration::from_secs(20),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_delay,
            max: self.max_delay,
        }
    }
}

/// Infinite iterator of capped, doubling delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next.min(self.max);
        self.next = current.saturating_mul(2).min(self.max);
        Some(current)
    }
}

/// Shared flag set by the interrupt handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ExportError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Outcome of one probe inside [`wait_until`].
#[derive(Debug)]
pub enum Poll<T> {
    Ready(T),
    Pending,
}

/// Why [`wait_until`] stopped without a value.
#[derive(Debug)]
pub enum WaitError {
    TimedOut(Duration),
    Failed(ExportError),
}

impl WaitError {
    /// Map a timeout onto the caller's error, keeping probe failures as is.
    pub fn into_export_error(self, on_timeout: impl FnOnce(Duration) -> ExportError) -> ExportError {
        match self {
            WaitError::TimedOut(waited) => on_timeout(waited),
            WaitError::Failed(err) => err,
        }
    }
}

/// Probe until it reports [`Poll::Ready`], sleeping per `policy` in between.
///
/// Transient probe errors count as `Pending`; other errors end the wait.
/// Cancellation is checked before every probe.
pub fn wait_until<T>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut probe: impl FnMut() -> Result<Poll<T>>,
) -> std::result::Result<T, WaitError> {
    let started = Instant::now();
    let mut delays = policy.backoff();
    loop {
        cancel.check().map_err(WaitError::Failed)?;
        match probe() {
            Ok(Poll::Ready(value)) => return Ok(value),
            Ok(Poll::Pending) => {}
            Err(err) if err.is_transient() => {
                tracing::debug!(error = %err, "transient error while polling");
            }
            Err(err) => return Err(WaitError::Failed(err)),
        }
        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            return Err(WaitError::TimedOut(elapsed));
        }
        let delay = delays
            .next()
            .unwrap_or(policy.max_delay)
            .min(policy.timeout - elapsed);
        std::thread::sleep(delay);
    }
}

/// Run `op`, retrying transient failures until `policy.timeout` elapses.
pub fn retry_transient<T>(policy: &RetryPolicy, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let started = Instant::now();
    let mut delays = policy.backoff();
    let mut attempt = 1u32;
    loop {
        match op() {
            Err(err) if err.is_transient() && started.elapsed() < policy.timeout => {
                let delay = delays.next().unwrap_or(policy.max_delay);
                tracing::warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying request");
                std::thread::sleep(delay);
                attempt += 1;
            }
            other => return other,
        }
    }
}
