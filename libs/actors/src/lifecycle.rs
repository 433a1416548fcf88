//! Actor Lifecycle
//!
//! An actor is a state value implementing [`Lifecycle`]. The system calls
//! the hooks in this order:
//!
//! ```text
//! initialize ─► start ─► tick* ─► stop ─┬─► start ─► ... (restart)
//!                                       └─► shutdown
//! ```
//!
//! `tick` runs on whichever lane currently owns the actor. It must return
//! before the deadline when possible and report [`TickResult::Yield`] if it
//! still has work.

use crate::error::Result;
use crate::handle::ActorHandle;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    /// More work pending, reschedule as soon as possible
    Yield,
    /// Idle until woken
    Wait,
}

/// Hooks driven by the scheduler and the actor system
pub trait Lifecycle: Send + 'static {
    /// Called once when the actor is added to a system
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once when the actor is removed from a system
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called on every system start
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called on every system stop
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn tick(&mut self, deadline: Instant) -> TickResult;
}

/// Registered actor: identity plus shared state
///
/// Cloning is cheap and shares the state.
#[derive(Clone)]
pub struct Actor {
    handle: ActorHandle,
    lifecycle: Arc<Mutex<dyn Lifecycle>>,
    state: Arc<dyn Any + Send + Sync>,
    bound_to_main_thread: bool,
}

impl Actor {
    pub fn new<S: Lifecycle>(state: S) -> Self {
        let shared = Arc::new(Mutex::new(state));
        Self {
            handle: ActorHandle::new::<S>(),
            lifecycle: shared.clone(),
            state: shared,
            bound_to_main_thread: false,
        }
    }

    /// Pin the actor to lane 0, the host-ticked lane
    pub fn bound_to_main_thread(mut self) -> Self {
        self.bound_to_main_thread = true;
        self
    }

    pub fn handle(&self) -> &ActorHandle {
        &self.handle
    }

    pub fn is_bound_to_main_thread(&self) -> bool {
        self.bound_to_main_thread
    }

    /// Typed access to the state, `None` if `S` is not the state type
    pub fn state<S: Lifecycle>(&self) -> Option<Arc<Mutex<S>>> {
        self.state.clone().downcast::<Mutex<S>>().ok()
    }

    pub(crate) fn lifecycle(&self) -> &Arc<Mutex<dyn Lifecycle>> {
        &self.lifecycle
    }

    pub(crate) fn tick(&self, deadline: Instant) -> TickResult {
        self.lifecycle.lock().tick(deadline)
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("handle", &self.handle)
            .field("bound_to_main_thread", &self.bound_to_main_thread)
            .finish()
    }
}
