//! Actor System
//!
//! Owns the registered actors and drives their lifecycle on top of a
//! [`Scheduler`].
//!
//! ```text
//!            add (Idle only)          remove (Idle only)
//!                 │                        ▲
//!           ┌─────▼─────┐   start    ┌─────┴─────┐
//!           │   Idle    │───────────►│  Running  │
//!           │           │◄───────────│           │
//!           └───────────┘    stop    └───────────┘
//! ```
//!
//! # Ordering
//!
//! - `start`: token, scheduler lanes, then per actor in registration
//!   order the `start` hook followed by its async drain task
//! - `stop`: cancel token, stop lanes, every `stop` hook, then wait for
//!   the drain tasks up to the drain timeout
//! - `shutdown`: `stop`, remove every actor (`shutdown` hooks), scheduler
//!   shutdown, dispose dependencies
//!
//! `stop` and `shutdown` block the calling thread for at most the drain
//! timeout. They may be called from a multi-thread runtime worker; on a
//! current-thread runtime driving the drain tasks itself, the drain tasks
//! cannot progress and are aborted once the timeout expires.

use crate::component::Components;
use crate::drain::start_task_for_async_components;
use crate::error::{ActorError, Result};
use crate::handle::ActorHandle;
use crate::lifecycle::{Actor, Lifecycle};
use crate::scheduler::Scheduler;
use parking_lot::Mutex;
use runtime_config::SystemSettings;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Extra time granted to the drain watcher past the drain timeout
const DRAIN_VERDICT_GRACE: Duration = Duration::from_millis(250);

/// Resource released when the system disposes its dependencies
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

struct Dependency {
    value: Arc<dyn Any + Send + Sync>,
    disposer: Option<Box<dyn Fn() + Send + Sync>>,
}

/// Type-keyed services shared with actors
#[derive(Default)]
pub struct Dependencies {
    entries: HashMap<TypeId, Dependency>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Send + Sync + 'static>(mut self, value: Arc<T>) -> Self {
        self.entries.insert(
            TypeId::of::<T>(),
            Dependency {
                value,
                disposer: None,
            },
        );
        self
    }

    /// Register a dependency disposed together with the others
    pub fn with_disposable<T: Disposable + 'static>(mut self, value: Arc<T>) -> Self {
        let disposed = Arc::clone(&value);
        self.entries.insert(
            TypeId::of::<T>(),
            Dependency {
                value,
                disposer: Some(Box::new(move || disposed.dispose())),
            },
        );
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value.clone().downcast::<T>().ok())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn dispose_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            if let Some(dispose) = entry.disposer {
                dispose();
            }
        }
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies")
            .field("count", &self.entries.len())
            .finish()
    }
}

struct ActorEntry {
    actor: Actor,
    components: Components,
    drain: Option<JoinHandle<()>>,
}

/// Registry and lifecycle driver for actors
pub struct ActorSystem {
    scheduler: Arc<Scheduler>,
    settings: SystemSettings,
    runtime: Handle,
    owned_runtime: Option<Runtime>,
    actors: HashMap<ActorHandle, ActorEntry>,
    /// Registration order, used for every lifecycle fan-out
    order: Vec<ActorHandle>,
    token: Option<CancellationToken>,
    dependencies: Dependencies,
    is_running: bool,
}

impl ActorSystem {
    /// System with default settings and its own drain runtime
    pub fn new(scheduler: Arc<Scheduler>) -> Result<Self> {
        Self::with_settings(scheduler, SystemSettings::default())
    }

    pub fn with_settings(scheduler: Arc<Scheduler>, settings: SystemSettings) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(settings.async_worker_threads.max(1))
            .thread_name("actor-drain")
            .enable_all()
            .build()
            .map_err(|e| ActorError::io("failed to build drain runtime", e))?;

        let mut system = Self::with_runtime(scheduler, runtime.handle().clone(), settings);
        system.owned_runtime = Some(runtime);
        Ok(system)
    }

    /// System running drain tasks on an existing runtime
    pub fn with_runtime(
        scheduler: Arc<Scheduler>,
        runtime: Handle,
        settings: SystemSettings,
    ) -> Self {
        Self {
            scheduler,
            settings,
            runtime,
            owned_runtime: None,
            actors: HashMap::new(),
            order: Vec::new(),
            token: None,
            dependencies: Dependencies::new(),
            is_running: false,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Runtime used for drain tasks and timers
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, handle: &ActorHandle) -> bool {
        self.actors.contains_key(handle)
    }

    /// Token of the current running period, created on first use
    pub fn token(&mut self) -> CancellationToken {
        self.token.get_or_insert_with(CancellationToken::new).clone()
    }

    /// Replace the dependencies, disposing the previous set
    pub fn set_dependencies(&mut self, dependencies: Dependencies) {
        self.dependencies.dispose_all();
        self.dependencies = dependencies;
    }

    pub fn dependency<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.dependencies.get::<T>()
    }

    /// Dispose every dependency and drop the token
    pub fn dispose_dependencies(&mut self) {
        if !self.dependencies.is_empty() {
            debug!(count = self.dependencies.len(), "Disposing dependencies");
        }
        self.dependencies.dispose_all();
        self.token = None;
    }

    /// Register an actor. Runs its `initialize` hook and schedules it,
    /// on lane 0 when bound to the main thread.
    pub fn add(&mut self, actor: Actor, components: Components) -> Result<ActorHandle> {
        if self.is_running {
            return Err(ActorError::not_supported(
                "cannot add an actor while the system is running",
            ));
        }

        let handle = actor.handle().clone();
        if self.actors.contains_key(&handle) {
            return Ok(handle);
        }

        actor.lifecycle().lock().initialize()?;

        let lane = actor.is_bound_to_main_thread().then_some(0);
        self.scheduler.add(&actor, lane)?;

        info!(
            actor = %handle,
            actor_type = handle.short_type_name(),
            main_thread = actor.is_bound_to_main_thread(),
            components = components.len(),
            "Actor added"
        );
        self.actors.insert(
            handle.clone(),
            ActorEntry {
                actor,
                components,
                drain: None,
            },
        );
        self.order.push(handle.clone());
        Ok(handle)
    }

    /// Start lanes, actors and drain tasks. No-op when already running.
    ///
    /// A failing `start` hook aborts the remaining starts; the system is
    /// then running and `stop` undoes what was started.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running {
            return Ok(());
        }

        let token = self.token();
        self.scheduler.start();
        self.is_running = true;

        for handle in &self.order {
            let Some(entry) = self.actors.get_mut(handle) else {
                continue;
            };
            entry.actor.lifecycle().lock().start()?;
            entry.drain = Some(start_task_for_async_components(
                Arc::clone(&self.scheduler),
                handle.clone(),
                entry.components.async_components(),
                token.clone(),
                &self.runtime,
            ));
        }

        info!(actors = self.order.len(), "Actor system started");
        Ok(())
    }

    /// Cancel the token ahead of `stop` so async components can start
    /// winding down
    pub fn pre_stop(&self) {
        if let Some(token) = &self.token {
            token.cancel();
        }
    }

    /// Stop lanes and actors and wait for the drain tasks.
    ///
    /// The system is idle afterwards even on error. Drain tasks still
    /// running after the timeout are aborted and reported as
    /// [`ActorError::DrainTimeout`]; otherwise the first failing `stop`
    /// hook is returned.
    pub fn stop(&mut self) -> Result<()> {
        if !self.is_running {
            return Ok(());
        }

        self.pre_stop();
        self.scheduler.stop();

        let mut first_error = None;
        for handle in &self.order {
            let Some(entry) = self.actors.get(handle) else {
                continue;
            };
            if let Err(e) = entry.actor.lifecycle().lock().stop() {
                error!(
                    actor = %handle,
                    actor_type = handle.short_type_name(),
                    error = %e,
                    "Actor stop failed"
                );
                first_error.get_or_insert(e);
            }
        }

        let stalled = self.wait_for_drain_tasks();

        self.token = None;
        self.is_running = false;
        info!("Actor system stopped");

        if !stalled.is_empty() {
            warn!(actors = ?stalled, "Async components did not finish in time");
            return Err(ActorError::DrainTimeout {
                actors: stalled,
                timeout_ms: self.settings.drain_timeout_ms,
            });
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Join the drain tasks on the system runtime and wait for the verdict
    /// on the calling thread, so this works from inside a runtime too.
    fn wait_for_drain_tasks(&mut self) -> Vec<String> {
        let tasks: Vec<(ActorHandle, JoinHandle<()>)> = self
            .order
            .iter()
            .filter_map(|handle| {
                let task = self.actors.get_mut(handle)?.drain.take()?;
                Some((handle.clone(), task))
            })
            .collect();
        if tasks.is_empty() {
            return Vec::new();
        }

        let aborts: Vec<(String, AbortHandle)> = tasks
            .iter()
            .map(|(handle, task)| (handle.short_type_name().to_string(), task.abort_handle()))
            .collect();

        let timeout = self.settings.drain_timeout();
        let (sender, receiver) = crossbeam_channel::bounded(1);
        self.runtime.spawn(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            let mut stalled = Vec::new();
            for (handle, mut task) in tasks {
                match tokio::time::timeout_at(deadline, &mut task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) if e.is_cancelled() => {}
                    Ok(Err(e)) => {
                        error!(actor = %handle, error = %e, "Async drain task failed");
                    }
                    Err(_) => {
                        task.abort();
                        stalled.push(handle.short_type_name().to_string());
                    }
                }
            }
            // Nobody listens any more once the caller gave up
            let _ = sender.send(stalled);
        });

        match receiver.recv_timeout(timeout + DRAIN_VERDICT_GRACE) {
            Ok(stalled) => stalled,
            Err(_) => {
                // The watcher never ran, e.g. the runtime is the caller's
                // current-thread runtime blocked right here
                warn!("Drain watcher did not report, aborting unfinished drain tasks");
                aborts
                    .into_iter()
                    .filter(|(_, abort)| !abort.is_finished())
                    .map(|(name, abort)| {
                        abort.abort();
                        name
                    })
                    .collect()
            }
        }
    }

    /// Unregister an idle actor and run its `shutdown` hook. Hook
    /// failures are logged, not returned.
    pub fn remove(&mut self, handle: &ActorHandle) -> Result<()> {
        if self.is_running {
            return Err(ActorError::not_supported(
                "cannot remove an actor while the system is running",
            ));
        }

        let entry = self
            .actors
            .remove(handle)
            .ok_or_else(|| ActorError::actor_not_found(handle.to_string()))?;
        self.order.retain(|registered| registered != handle);

        self.scheduler.remove(handle);
        if let Err(e) = entry.actor.lifecycle().lock().shutdown() {
            error!(
                actor = %handle,
                actor_type = handle.short_type_name(),
                error = %e,
                "Actor shutdown failed"
            );
        }

        info!(actor = %handle, actor_type = handle.short_type_name(), "Actor removed");
        Ok(())
    }

    /// Stop, remove every actor, shut the scheduler down and dispose
    /// dependencies. Errors are reported after the whole teardown ran.
    pub fn shutdown(&mut self) -> Result<()> {
        let stopped = self.stop();

        for handle in self.order.clone() {
            self.remove(&handle)?;
        }

        let scheduler = self.scheduler.shutdown();
        self.dispose_dependencies();
        info!("Actor system shut down");

        stopped.and(scheduler)
    }

    /// State of the first registered actor of type `S`
    pub fn actor_state<S: Lifecycle>(&self) -> Result<Arc<Mutex<S>>> {
        self.try_actor_state::<S>()
            .ok_or_else(|| ActorError::actor_not_found(std::any::type_name::<S>()))
    }

    pub fn try_actor_state<S: Lifecycle>(&self) -> Option<Arc<Mutex<S>>> {
        self.order
            .iter()
            .filter_map(|handle| self.actors.get(handle))
            .find_map(|entry| entry.actor.state::<S>())
    }

    /// Handle of the first registered actor of type `S`
    pub fn actor_handle<S: Lifecycle>(&self) -> Result<ActorHandle> {
        self.try_actor_handle::<S>()
            .ok_or_else(|| ActorError::actor_not_found(std::any::type_name::<S>()))
    }

    pub fn try_actor_handle<S: Lifecycle>(&self) -> Option<ActorHandle> {
        self.order
            .iter()
            .find(|handle| {
                self.actors
                    .get(*handle)
                    .is_some_and(|entry| entry.actor.state::<S>().is_some())
            })
            .cloned()
    }

    pub fn components(&self, handle: &ActorHandle) -> Option<&Components> {
        self.actors.get(handle).map(|entry| &entry.components)
    }
}

impl Drop for ActorSystem {
    fn drop(&mut self) {
        if self.is_running {
            if let Err(e) = self.stop() {
                warn!(error = %e, "Actor system stop during drop failed");
            }
        }
        if let Some(runtime) = self.owned_runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::TickResult;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    #[derive(Default)]
    struct Idle;

    impl Lifecycle for Idle {
        fn tick(&mut self, _deadline: Instant) -> TickResult {
            TickResult::Wait
        }
    }

    struct FailingInit;

    impl Lifecycle for FailingInit {
        fn initialize(&mut self) -> Result<()> {
            Err(ActorError::lifecycle("FailingInit", "initialize", "missing asset"))
        }

        fn tick(&mut self, _deadline: Instant) -> TickResult {
            TickResult::Wait
        }
    }

    #[derive(Default)]
    struct Pool {
        disposed: AtomicBool,
    }

    impl Disposable for Pool {
        fn dispose(&self) {
            self.disposed.store(true, Ordering::SeqCst);
        }
    }

    fn system() -> ActorSystem {
        let scheduler = Arc::new(Scheduler::new(2));
        scheduler.set_periodic_ticking_thread(0).unwrap();
        ActorSystem::new(scheduler).unwrap()
    }

    #[test]
    fn test_failed_initialize_does_not_register() {
        let mut system = system();
        let actor = Actor::new(FailingInit);
        let err = system.add(actor.clone(), Components::new()).unwrap_err();
        assert_eq!(err.category(), "lifecycle");
        assert!(!system.contains(actor.handle()));
        assert!(!system.scheduler().contains(actor.handle()));
    }

    #[test]
    fn test_main_thread_actor_lands_on_lane_zero() {
        let mut system = system();
        let handle = system
            .add(Actor::new(Idle).bound_to_main_thread(), Components::new())
            .unwrap();
        assert_eq!(system.scheduler().lane_of(&handle), Some(0));

        let background = system.add(Actor::new(Idle), Components::new()).unwrap();
        assert_eq!(system.scheduler().lane_of(&background), Some(1));
    }

    #[test]
    fn test_lookup_by_state_type() {
        let mut system = system();
        assert!(system.try_actor_state::<Idle>().is_none());
        assert!(matches!(
            system.actor_handle::<Idle>(),
            Err(ActorError::ActorNotFound { .. })
        ));

        let handle = system.add(Actor::new(Idle), Components::new()).unwrap();
        assert_eq!(system.actor_handle::<Idle>().unwrap(), handle);
        assert!(system.actor_state::<Idle>().is_ok());
        assert!(system.try_actor_state::<FailingInit>().is_none());
    }

    #[test]
    fn test_remove_unknown_actor() {
        let mut system = system();
        let err = system.remove(&ActorHandle::new::<Idle>()).unwrap_err();
        assert!(matches!(err, ActorError::ActorNotFound { .. }));
    }

    #[test]
    fn test_dependencies_disposed_on_replace_and_shutdown() {
        let mut system = system();
        let first = Arc::new(Pool::default());
        system.set_dependencies(Dependencies::new().with_disposable(first.clone()));
        assert!(system.dependency::<Pool>().is_some());

        let second = Arc::new(Pool::default());
        system.set_dependencies(
            Dependencies::new()
                .with_disposable(second.clone())
                .with(Arc::new(String::from("config"))),
        );
        assert!(first.disposed.load(Ordering::SeqCst));
        assert!(!second.disposed.load(Ordering::SeqCst));
        assert_eq!(system.dependency::<String>().unwrap().as_str(), "config");

        system.shutdown().unwrap();
        assert!(second.disposed.load(Ordering::SeqCst));
        assert!(system.dependency::<Pool>().is_none());
    }

    #[test]
    fn test_token_is_per_running_period() {
        let mut system = system();
        let first = system.token();
        system.start().unwrap();
        assert!(!first.is_cancelled());

        system.stop().unwrap();
        assert!(first.is_cancelled());

        let second = system.token();
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let mut system = system();
        system.add(Actor::new(Idle), Components::new()).unwrap();
        system.start().unwrap();
        system.start().unwrap();
        assert!(system.is_running());
        system.stop().unwrap();
        system.stop().unwrap();
        assert!(!system.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_from_async_host() {
        let mut system = system();
        system.add(Actor::new(Idle), Components::new()).unwrap();

        system.start().unwrap();
        system.stop().unwrap();
        assert!(!system.is_running());

        system.start().unwrap();
        system.shutdown().unwrap();
        assert!(system.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_running_system_inside_runtime() {
        let mut system = system();
        system.add(Actor::new(Idle), Components::new()).unwrap();
        system.start().unwrap();
        drop(system);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_on_host_runtime_drains_components() {
        let scheduler = Arc::new(Scheduler::new(2));
        scheduler.set_periodic_ticking_thread(0).unwrap();
        let mut system =
            ActorSystem::with_runtime(scheduler, Handle::current(), SystemSettings::default());

        let timer = crate::timer::TimerComponent::new(Handle::current(), system.token());
        system
            .add(Actor::new(Idle), Components::new().with_async(timer))
            .unwrap();
        system.start().unwrap();

        let began = Instant::now();
        system.stop().unwrap();
        assert!(began.elapsed() < Duration::from_secs(5));
    }
}
