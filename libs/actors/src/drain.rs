//! Background draining of async components.
//!
//! One task per actor keeps a single outstanding `wait` per async
//! component and wakes the actor whenever any of them returns.

use crate::component::{AsyncComponent, WaitResult};
use crate::error::Result;
use crate::handle::ActorHandle;
use crate::scheduler::Scheduler;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

type WaitOutcome = (usize, std::thread::Result<Result<WaitResult>>);

/// Spawn the drain task for one actor on `runtime`.
///
/// The task ends once every component has completed, failed, or observed
/// cancellation. With no components it finishes immediately.
pub fn start_task_for_async_components(
    scheduler: Arc<Scheduler>,
    handle: ActorHandle,
    components: &[Arc<dyn AsyncComponent>],
    token: CancellationToken,
    runtime: &Handle,
) -> JoinHandle<()> {
    if components.is_empty() {
        return runtime.spawn(async {});
    }

    let components = components.to_vec();
    runtime.spawn(drain_async_components(scheduler, handle, components, token))
}

async fn drain_async_components(
    scheduler: Arc<Scheduler>,
    handle: ActorHandle,
    components: Vec<Arc<dyn AsyncComponent>>,
    token: CancellationToken,
) {
    // Every component starts as if it had returned `Continuing`
    let mut pending: FuturesUnordered<BoxFuture<'static, WaitOutcome>> = components
        .iter()
        .enumerate()
        .map(|(index, component)| wait_on(index, Arc::clone(component), token.clone()))
        .collect();
    scheduler.wake_up_actor(&handle);

    while let Some(first) = pending.next().await {
        let mut finished = vec![first];
        while let Some(Some(outcome)) = pending.next().now_or_never() {
            finished.push(outcome);
        }

        for (index, outcome) in finished {
            match outcome {
                Ok(Ok(WaitResult::Continuing)) => {
                    pending.push(wait_on(index, Arc::clone(&components[index]), token.clone()));
                }
                Ok(Ok(WaitResult::Completed)) => {
                    debug!(actor = %handle, component = index, "Async component completed");
                }
                Ok(Err(e)) if e.is_cancellation() => {}
                Ok(Err(e)) => {
                    error!(
                        actor = %handle,
                        actor_type = handle.short_type_name(),
                        component = index,
                        error = %e,
                        "Async component failed"
                    );
                }
                Err(_) => {
                    error!(
                        actor = %handle,
                        actor_type = handle.short_type_name(),
                        component = index,
                        "Async component panicked"
                    );
                }
            }
        }

        scheduler.wake_up_actor(&handle);
    }

    debug!(actor = %handle, "Async drain finished");
}

fn wait_on(
    index: usize,
    component: Arc<dyn AsyncComponent>,
    token: CancellationToken,
) -> BoxFuture<'static, WaitOutcome> {
    async move {
        let outcome = AssertUnwindSafe(component.wait(token)).catch_unwind().await;
        (index, outcome)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::RunnableComponent;
    use crate::error::ActorError;
    use crate::lifecycle::{Actor, Lifecycle, TickResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Counter {
        ticks: u32,
    }

    impl Lifecycle for Counter {
        fn tick(&mut self, _deadline: Instant) -> TickResult {
            self.ticks += 1;
            TickResult::Wait
        }
    }

    /// Continues `rounds` times, then completes
    struct Rounds {
        left: AtomicU32,
    }

    impl RunnableComponent for Rounds {
        fn tick(&self, _deadline: Instant) -> TickResult {
            TickResult::Wait
        }
    }

    #[async_trait]
    impl AsyncComponent for Rounds {
        async fn wait(&self, _token: CancellationToken) -> Result<WaitResult> {
            tokio::time::sleep(Duration::from_millis(1)).await;
            if self.left.fetch_sub(1, Ordering::SeqCst) > 1 {
                Ok(WaitResult::Continuing)
            } else {
                Ok(WaitResult::Completed)
            }
        }
    }

    struct Faulty;

    impl RunnableComponent for Faulty {
        fn tick(&self, _deadline: Instant) -> TickResult {
            TickResult::Wait
        }
    }

    #[async_trait]
    impl AsyncComponent for Faulty {
        async fn wait(&self, _token: CancellationToken) -> Result<WaitResult> {
            Err(ActorError::component("socket closed"))
        }
    }

    struct Panicky;

    impl RunnableComponent for Panicky {
        fn tick(&self, _deadline: Instant) -> TickResult {
            TickResult::Wait
        }
    }

    #[async_trait]
    impl AsyncComponent for Panicky {
        async fn wait(&self, _token: CancellationToken) -> Result<WaitResult> {
            panic!("component bug");
        }
    }

    struct UntilCancelled;

    impl RunnableComponent for UntilCancelled {
        fn tick(&self, _deadline: Instant) -> TickResult {
            TickResult::Wait
        }
    }

    #[async_trait]
    impl AsyncComponent for UntilCancelled {
        async fn wait(&self, token: CancellationToken) -> Result<WaitResult> {
            token.cancelled().await;
            Err(ActorError::Cancelled)
        }
    }

    fn cooperative_scheduler() -> (Arc<Scheduler>, Actor) {
        let scheduler = Arc::new(Scheduler::new(1));
        scheduler.set_periodic_ticking_thread(0).unwrap();
        let actor = Actor::new(Counter::default());
        scheduler.add(&actor, Some(0)).unwrap();
        let start = Instant::now();
        scheduler.tick(start, start, 0).unwrap();
        (scheduler, actor)
    }

    fn ticks_after_wakeups(scheduler: &Scheduler, actor: &Actor) -> u32 {
        let start = Instant::now();
        scheduler.tick(start, start, 0).unwrap();
        actor.state::<Counter>().unwrap().lock().ticks
    }

    #[tokio::test]
    async fn test_no_components_finishes_immediately() {
        let (scheduler, actor) = cooperative_scheduler();
        let task = start_task_for_async_components(
            scheduler,
            actor.handle().clone(),
            &[],
            CancellationToken::new(),
            &Handle::current(),
        );
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_components_drain_and_wake_actor() {
        let (scheduler, actor) = cooperative_scheduler();
        let components: Vec<Arc<dyn AsyncComponent>> = vec![
            Arc::new(Rounds {
                left: AtomicU32::new(3),
            }),
            Arc::new(Faulty),
            Arc::new(Panicky),
        ];

        let task = start_task_for_async_components(
            scheduler.clone(),
            actor.handle().clone(),
            &components,
            CancellationToken::new(),
            &Handle::current(),
        );
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("drain did not finish")
            .unwrap();

        // Woken at least once, so the next cycle ticks it
        assert_eq!(ticks_after_wakeups(&scheduler, &actor), 2);
    }

    #[tokio::test]
    async fn test_cancellation_ends_drain() {
        let (scheduler, actor) = cooperative_scheduler();
        let token = CancellationToken::new();
        let components: Vec<Arc<dyn AsyncComponent>> = vec![Arc::new(UntilCancelled)];

        let task = start_task_for_async_components(
            scheduler,
            actor.handle().clone(),
            &components,
            token.clone(),
            &Handle::current(),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("drain ignored cancellation")
            .unwrap();
    }
}
