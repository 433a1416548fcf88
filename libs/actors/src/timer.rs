//! Delayed callbacks executed on the owning actor's lane.

use crate::component::{AsyncComponent, RunnableComponent, WaitResult};
use crate::error::Result;
use crate::lifecycle::TickResult;
use crate::sync::MpscSynchronizer;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TimerState {
    next_id: u64,
    pending: HashMap<u64, (JoinHandle<()>, Callback)>,
    ready: Vec<Callback>,
}

/// Async component running callbacks after a delay.
///
/// Timers sleep on the tokio runtime. When one fires, its callback is
/// queued and the actor is woken through the drain task; the callback
/// then runs inside the actor's next tick, on the actor's lane.
pub struct TimerComponent {
    runtime: Handle,
    global_token: CancellationToken,
    synchronizer: MpscSynchronizer,
    work_is_waiting: AtomicBool,
    state: Mutex<TimerState>,
}

impl TimerComponent {
    /// `global_token` is the actor system token; once it is cancelled new
    /// timers are ignored.
    ///
    /// `ActorSystem::stop` cancels the token of the running period and the
    /// next `start` uses a new one. A timer built from an old token stays
    /// inert after a restart, so build it from `ActorSystem::token` of the
    /// period it should serve.
    pub fn new(runtime: Handle, global_token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            global_token,
            synchronizer: MpscSynchronizer::new(),
            work_is_waiting: AtomicBool::new(false),
            state: Mutex::new(TimerState::default()),
        })
    }

    pub fn delayed_execute<F>(self: &Arc<Self>, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.global_token.is_cancelled() {
            return;
        }

        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;

        let timer: Weak<Self> = Arc::downgrade(self);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(timer) = timer.upgrade() {
                timer.fire(id);
            }
        });
        state.pending.insert(id, (task, Box::new(callback)));
        trace!(timer = id, delay_ms = delay.as_millis() as u64, "Timer scheduled");
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn fire(&self, id: u64) {
        {
            let mut state = self.state.lock();
            let Some((_, callback)) = state.pending.remove(&id) else {
                return;
            };
            state.ready.push(callback);
            self.work_is_waiting.store(true, Ordering::Release);
        }
        self.synchronizer.set();
    }
}

impl RunnableComponent for TimerComponent {
    fn tick(&self, _deadline: Instant) -> TickResult {
        // Skip the lock for actors whose timers are all idle
        if !self.work_is_waiting.load(Ordering::Acquire) {
            return TickResult::Wait;
        }

        let ready = {
            let mut state = self.state.lock();
            self.work_is_waiting.store(false, Ordering::Release);
            std::mem::take(&mut state.ready)
        };
        for callback in ready {
            callback();
        }
        TickResult::Wait
    }
}

#[async_trait]
impl AsyncComponent for TimerComponent {
    async fn wait(&self, token: CancellationToken) -> Result<WaitResult> {
        if self.synchronizer.wait(&token).await.is_err() {
            if self.state.lock().pending.is_empty() {
                return Ok(WaitResult::Completed);
            }
            // Let already scheduled timers land before finishing
            self.synchronizer.wait(&CancellationToken::new()).await?;
        }
        Ok(WaitResult::Continuing)
    }
}

impl Drop for TimerComponent {
    fn drop(&mut self) {
        for (_, (task, _)) in self.state.get_mut().pending.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_callback_runs_on_tick_after_delay() {
        let timer = TimerComponent::new(Handle::current(), CancellationToken::new());
        let fired = Arc::new(AtomicU32::new(0));

        let counter = fired.clone();
        timer.delayed_execute(Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(timer.pending(), 1);

        // Not due yet
        timer.tick(Instant::now());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let wait = timer.wait(CancellationToken::new());
        let result = tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, WaitResult::Continuing);
        assert_eq!(timer.pending(), 0);

        timer.tick(Instant::now());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ignored_after_global_cancel() {
        let token = CancellationToken::new();
        let timer = TimerComponent::new(Handle::current(), token.clone());
        token.cancel();

        timer.delayed_execute(Duration::from_millis(1), || {});
        assert_eq!(timer.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_wait_completes_without_timers() {
        let timer = TimerComponent::new(Handle::current(), CancellationToken::new());
        let token = CancellationToken::new();
        token.cancel();

        let result = timer.wait(token).await.unwrap();
        assert_eq!(result, WaitResult::Completed);
    }

    #[tokio::test]
    async fn test_cancelled_wait_lets_pending_timer_land() {
        let timer = TimerComponent::new(Handle::current(), CancellationToken::new());
        timer.delayed_execute(Duration::from_millis(20), || {});
        let token = CancellationToken::new();
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), timer.wait(token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, WaitResult::Continuing);
    }
}
