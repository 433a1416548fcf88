//! Signalling primitives.
//!
//! - [`AutoResetEvent`]: blocking wake-up for lane threads
//! - [`MpscSynchronizer`]: async signal with many producers and one waiter

use crate::error::{ActorError, Result};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Binary event that resets when a waiter consumes it
#[derive(Debug)]
pub struct AutoResetEvent {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl AutoResetEvent {
    pub fn new(initially_set: bool) -> Self {
        Self {
            signaled: Mutex::new(initially_set),
            condvar: Condvar::new(),
        }
    }

    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.condvar.notify_one();
    }

    /// Returns `true` if the event was consumed, `false` on timeout
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.condvar.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *signaled, false)
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }
}

impl Default for AutoResetEvent {
    fn default() -> Self {
        Self::new(false)
    }
}

#[derive(Debug, Default)]
struct SyncState {
    signals: usize,
    waiter: Option<oneshot::Sender<()>>,
}

/// Multiple producer, single consumer async signal.
///
/// A `set` with nobody waiting is banked and consumed by the next `wait`.
#[derive(Debug, Default)]
pub struct MpscSynchronizer {
    state: Mutex<SyncState>,
}

impl MpscSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for one signal. Cancelling `token` ends the wait with
    /// [`ActorError::Cancelled`].
    pub async fn wait(&self, token: &CancellationToken) -> Result<()> {
        let receiver = {
            let mut state = self.state.lock();
            if state.signals > 0 {
                state.signals -= 1;
                return Ok(());
            }
            let (sender, receiver) = oneshot::channel();
            state.waiter = Some(sender);
            receiver
        };

        tokio::select! {
            biased;
            signaled = receiver => signaled.map_err(|_| ActorError::Cancelled),
            _ = token.cancelled() => {
                self.state.lock().waiter = None;
                Err(ActorError::Cancelled)
            }
        }
    }

    pub fn set(&self) {
        let mut state = self.state.lock();
        if let Some(waiter) = state.waiter.take() {
            if waiter.send(()).is_ok() {
                return;
            }
        }
        state.signals += 1;
    }

    pub fn remove_one_signal(&self) {
        let mut state = self.state.lock();
        state.signals = state.signals.saturating_sub(1);
    }

    pub fn is_currently_signaled(&self) -> bool {
        self.state.lock().signals > 0
    }
}
