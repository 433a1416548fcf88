//! Actor Components
//!
//! Components are pieces of reusable actor machinery. A runnable component
//! is ticked from the owning actor's tick. An async component additionally
//! exposes a `wait` future that the system drains in the background; each
//! time one of those waits returns the actor is woken so its tick can pick
//! up the new work.
//!
//! ```text
//!  background (tokio)                  lane thread
//!  ──────────────────                  ───────────
//!  component.wait() ──► Continuing ──► wake_up_actor ──► actor.tick()
//!        ▲                                                   │
//!        └──────────────── re-issued ◄───────────────────────┘
//! ```

use crate::error::Result;
use crate::lifecycle::{Lifecycle, TickResult};
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of one async wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// Wait again after the actor has been woken
    Continuing,
    /// No more waits for this component
    Completed,
}

/// Component ticked by its owning actor
pub trait RunnableComponent: Send + Sync + 'static {
    fn tick(&self, deadline: Instant) -> TickResult;
}

/// Component with background work
#[async_trait]
pub trait AsyncComponent: RunnableComponent {
    /// Resolve when the owning actor has something to do.
    ///
    /// Returning `Err(ActorError::Cancelled)` after `token` fires is the
    /// normal way to finish; any other error is logged and ends this
    /// component's waits.
    async fn wait(&self, token: CancellationToken) -> Result<WaitResult>;
}

/// Type-keyed set of components handed to `ActorSystem::add`
#[derive(Clone, Default)]
pub struct Components {
    by_type: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    runnable: Vec<Arc<dyn RunnableComponent>>,
    asynchronous: Vec<Arc<dyn AsyncComponent>>,
}

impl Components {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runnable component
    pub fn with<C: RunnableComponent>(mut self, component: Arc<C>) -> Self {
        self.by_type.insert(TypeId::of::<C>(), component.clone());
        self.runnable.push(component);
        self
    }

    /// Register an async component; it is ticked as well
    pub fn with_async<C: AsyncComponent>(mut self, component: Arc<C>) -> Self {
        self.by_type.insert(TypeId::of::<C>(), component.clone());
        self.runnable.push(component.clone());
        self.asynchronous.push(component);
        self
    }

    pub fn get<C: Send + Sync + 'static>(&self) -> Option<Arc<C>> {
        self.by_type
            .get(&TypeId::of::<C>())
            .and_then(|component| component.clone().downcast::<C>().ok())
    }

    pub fn async_components(&self) -> &[Arc<dyn AsyncComponent>] {
        &self.asynchronous
    }

    /// Default tick over every registered component
    pub fn ticker(&self) -> ComponentTicker {
        ComponentTicker::new(self.runnable.clone())
    }

    pub fn len(&self) -> usize {
        self.runnable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runnable.is_empty()
    }
}

impl fmt::Debug for Components {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Components")
            .field("runnable", &self.runnable.len())
            .field("async", &self.asynchronous.len())
            .finish()
    }
}

/// Round-robin tick over runnable components.
///
/// Stops at the first component that yields so a busy component cannot
/// starve the others across ticks. Also usable directly as the state of
/// an actor that has no logic of its own.
pub struct ComponentTicker {
    components: Vec<Arc<dyn RunnableComponent>>,
    next: usize,
}

impl ComponentTicker {
    pub fn new(components: Vec<Arc<dyn RunnableComponent>>) -> Self {
        Self {
            components,
            next: 0,
        }
    }

    pub fn tick(&mut self, deadline: Instant) -> TickResult {
        let count = self.components.len();
        for _ in 0..count {
            let index = self.next;
            self.next = (self.next + 1) % count;
            if self.components[index].tick(deadline) == TickResult::Yield {
                return TickResult::Yield;
            }
        }
        TickResult::Wait
    }
}

impl Lifecycle for ComponentTicker {
    fn tick(&mut self, deadline: Instant) -> TickResult {
        ComponentTicker::tick(self, deadline)
    }
}
