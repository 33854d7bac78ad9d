//! Cancellation tokens and pollable handles for background jobs.
//!
//! A job runs on tokio's blocking pool and reports back through a oneshot
//! channel. The control loop never awaits a job: it calls `poll()` once per
//! tick. A job that observes its token as cancelled returns `None` and the
//! sender is dropped, so partial results are never delivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// How often tight loops should look at the token.
/// Power of 2 so the modulo is a bitwise AND.
pub const CANCEL_CHECK_INTERVAL: usize = 0x400;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns `Some(())` while still live, so loops can bail out with `?`.
    #[inline]
    pub fn check(&self) -> Option<()> {
        if self.is_cancelled() {
            None
        } else {
            Some(())
        }
    }

    /// Like `check`, but only reads the flag every `CANCEL_CHECK_INTERVAL`
    /// iterations.
    #[inline]
    pub fn check_sparse(&self, counter: usize) -> Option<()> {
        if counter & (CANCEL_CHECK_INTERVAL - 1) == 0 {
            self.check()
        } else {
            Some(())
        }
    }
}

/// What a job looks like from the control loop at one instant.
#[derive(Debug)]
pub enum JobStatus<T> {
    Running,
    Finished(T),
    /// Cancelled, panicked or already collected. Nothing to publish.
    Gone,
}

#[derive(Debug)]
pub struct JobHandle<T> {
    token: CancelToken,
    receiver: oneshot::Receiver<T>,
}

impl<T: Send + 'static> JobHandle<T> {
    /// Starts `job` on the blocking pool of `runtime`.
    pub fn spawn<F>(runtime: &Handle, job: F) -> Self
    where
        F: FnOnce(&CancelToken) -> Option<T> + Send + 'static,
    {
        let token = CancelToken::new();
        let (sender, receiver) = oneshot::channel();
        let job_token = token.clone();
        runtime.spawn_blocking(move || {
            if let Some(output) = job(&job_token) {
                if !job_token.is_cancelled() {
                    let _ = sender.send(output);
                }
            }
        });
        Self { token, receiver }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn poll(&mut self) -> JobStatus<T> {
        match self.receiver.try_recv() {
            Ok(output) => JobStatus::Finished(output),
            Err(oneshot::error::TryRecvError::Empty) => JobStatus::Running,
            Err(oneshot::error::TryRecvError::Closed) => JobStatus::Gone,
        }
    }
}

impl<T> Drop for JobHandle<T> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
