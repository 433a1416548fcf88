//! Lane-Scheduled Actor Runtime
//!
//! In-process actors executed by a work-stealing scheduler that mixes
//! host-ticked (cooperative) lanes with dedicated background threads under
//! one per-cycle time budget.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │         ActorSystem          │  add / start / stop / remove / shutdown
//! │  ┌────────────┐ ┌──────────┐ │
//! │  │  actors +  │ │  drain   │ │  one tokio task per actor with
//! │  │ components │ │  tasks   │─┼─ async components, waking it
//! │  └─────┬──────┘ └──────────┘ │
//! └────────┼─────────────────────┘
//!          │
//! ┌────────▼─────────────────────┐
//! │          Scheduler           │
//! │ ┌──────┐ ┌──────┐ ┌──────┐   │
//! │ │lane 0│ │lane 1│ │lane 2│.. │  lanes trade actors through
//! │ │ host │ │thread│ │thread│   │  inbox messages when one is
//! │ └──────┘ └──────┘ └──────┘   │  saturated and another idle
//! └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use actor_runtime::{Actor, ActorSystem, Components, Lifecycle, Scheduler, TickResult};
//! use std::sync::Arc;
//! use std::time::{Duration, Instant};
//!
//! struct Heartbeat {
//!     beats: u64,
//! }
//!
//! impl Lifecycle for Heartbeat {
//!     fn tick(&mut self, _deadline: Instant) -> TickResult {
//!         self.beats += 1;
//!         TickResult::Wait
//!     }
//! }
//!
//! let scheduler = Arc::new(Scheduler::new(4));
//! scheduler.set_periodic_ticking_thread(0)?;
//!
//! let mut system = ActorSystem::new(scheduler.clone())?;
//! system.add(Actor::new(Heartbeat { beats: 0 }).bound_to_main_thread(), Components::new())?;
//! system.start()?;
//!
//! // Host loop drives lane 0
//! for _ in 0..100 {
//!     let start = Instant::now();
//!     scheduler.tick(start, start + Duration::from_millis(9), 0)?;
//!     std::thread::sleep(Duration::from_millis(10));
//! }
//!
//! system.shutdown()?;
//! # Ok::<(), actor_runtime::ActorError>(())
//! ```

pub mod component;
pub mod drain;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod queue;
pub mod scheduler;
pub mod sync;
pub mod system;
pub mod timer;

pub use component::{AsyncComponent, ComponentTicker, Components, RunnableComponent, WaitResult};
pub use drain::start_task_for_async_components;
pub use error::{ActorError, Result};
pub use handle::ActorHandle;
pub use lifecycle::{Actor, Lifecycle, TickResult};
pub use queue::SwsrQueue;
pub use scheduler::{ActorTimings, LaneSnapshot, LoadTracker, Scheduler, SchedulerSnapshot};
pub use sync::{AutoResetEvent, MpscSynchronizer};
pub use system::{ActorSystem, Dependencies, Disposable};
pub use timer::TimerComponent;
