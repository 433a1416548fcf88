//! Scheduler
//!
//! Spreads actors over a fixed set of lanes and moves them between lanes
//! when load is unbalanced.
//!
//! ```text
//!          add / remove / wake_up_actor (any thread)
//!                         │
//!                ┌────────▼────────┐
//!                │    Scheduler    │  copy-on-write actor map
//!                └───┬────┬────┬───┘
//!        AddActor    │    │    │    RemoveActor
//!              ┌─────▼┐ ┌─▼────┐ ┌▼─────┐      ┌──────────────┐
//!              │lane 0│ │lane 1│ │lane 2│ ...  │ bookkeeping  │
//!              │(host)│ │thread│ │thread│─────►│ lane (never  │
//!              └──────┘ └──▲───┘ └──┬───┘      │ ticked)      │
//!                          └────────┘          └──────────────┘
//!                     StealActor / StealActorResponse
//! ```
//!
//! `add` and `remove` are serialized by one lock. Removal is confirmed by
//! the owning lane through the bookkeeping lane's inbox, and the confirmed
//! actors leave the map on the next `add` or `process_pending_removals`.

mod execution_group;
mod load;
mod message;
mod state;
mod stats;

pub use load::LoadTracker;
pub use stats::{ActorTimings, LaneSnapshot, SchedulerSnapshot};

use crate::error::{ActorError, Result};
use crate::handle::ActorHandle;
use crate::lifecycle::Actor;
use execution_group::LaneSet;
use message::ThreadMessage;
use parking_lot::{Mutex, RwLock};
use runtime_config::SchedulerSettings;
use state::ActorState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

type ActorMap = HashMap<ActorHandle, Arc<ActorState>>;

/// Work-stealing actor scheduler
pub struct Scheduler {
    lanes: Arc<LaneSet>,
    /// Serializes add/remove; holds the round-robin cursor
    external_call_lock: Mutex<usize>,
    actors: RwLock<Arc<ActorMap>>,
}

impl Scheduler {
    /// Scheduler with `nb_lanes` lanes (at least one) and default tuning
    pub fn new(nb_lanes: usize) -> Self {
        Self::build(nb_lanes.max(1), SchedulerSettings::with_lanes(nb_lanes.max(1)))
    }

    pub fn with_settings(settings: SchedulerSettings) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| ActorError::configuration(e.to_string(), Some("scheduler")))?;
        let nb_lanes = settings.resolved_lanes();
        let cooperative = settings.cooperative_lanes.clone();

        let scheduler = Self::build(nb_lanes, settings);
        for index in cooperative {
            scheduler.set_periodic_ticking_thread(index)?;
        }
        Ok(scheduler)
    }

    fn build(nb_lanes: usize, settings: SchedulerSettings) -> Self {
        info!(
            lanes = nb_lanes,
            cycle_ms = settings.cycle_time_ms,
            sample_size = settings.sample_size,
            actor_timing = settings.actor_timing,
            "Creating scheduler"
        );
        Self {
            lanes: Arc::new(LaneSet::new(nb_lanes, settings)),
            external_call_lock: Mutex::new(0),
            actors: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Number of logical lanes
    pub fn nb_lanes(&self) -> usize {
        self.lanes.logical().len()
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.lanes.settings
    }

    /// Hand lane `index` to the host. The host must then call [`tick`]
    /// for that lane periodically or its actors never run.
    ///
    /// [`tick`]: Scheduler::tick
    pub fn set_periodic_ticking_thread(&self, index: usize) -> Result<()> {
        let lane = self.logical_lane(index)?;
        lane.set_cooperative();
        debug!(lane = index, "Lane set to cooperative ticking");
        Ok(())
    }

    pub fn is_cooperative(&self, index: usize) -> Result<bool> {
        Ok(self.logical_lane(index)?.is_cooperative())
    }

    /// Start every dedicated lane thread
    pub fn start(&self) {
        self.lanes.start();
    }

    /// Stop and join every dedicated lane thread
    pub fn stop(&self) {
        self.lanes.stop();
    }

    /// Stop lanes and write the timing report if one is configured
    pub fn shutdown(&self) -> Result<()> {
        self.stop();
        if let (Some(timings), Some(path)) = (
            self.lanes.timings.as_ref(),
            self.lanes.settings.timing_report_path.as_ref(),
        ) {
            timings.write_report(path)?;
        }
        info!("Scheduler shut down");
        Ok(())
    }

    /// Run one cycle of a cooperative lane from the calling thread
    pub fn tick(&self, start: Instant, end: Instant, index: usize) -> Result<()> {
        let lane = self.logical_lane(index)?;
        lane.cooperative_tick(&self.lanes, start, end);
        Ok(())
    }

    /// Mark the actor ready and wake its lane. Unknown handles are ignored.
    pub fn wake_up_actor(&self, handle: &ActorHandle) {
        let actors = Arc::clone(&self.actors.read());
        if let Some(state) = actors.get(handle) {
            state.set_ready(true);
            self.lanes.groups[state.group()].signal();
        }
    }

    /// Register an actor on `lane`, or on the next dedicated lane in
    /// round-robin order. Adding a registered actor is a no-op, except
    /// for one whose removal is still unconfirmed: that actor gets a
    /// fresh registration, and the late confirmation leaves it alone.
    pub fn add(&self, actor: &Actor, lane: Option<usize>) -> Result<()> {
        if let Some(index) = lane {
            self.logical_lane(index)?;
        }

        let mut cursor = self.external_call_lock.lock();
        self.drain_removals();

        let handle = actor.handle();
        let current = Arc::clone(&self.actors.read());
        if current
            .get(handle)
            .is_some_and(|state| !state.is_removed())
        {
            return Ok(());
        }

        let index = lane
            .or_else(|| self.next_non_cooperative_lane(&mut cursor))
            .unwrap_or(0);

        let state = Arc::new(ActorState::new(actor.clone(), index));
        let mut actors = ActorMap::clone(&current);
        actors.insert(handle.clone(), Arc::clone(&state));
        *self.actors.write() = Arc::new(actors);

        debug!(
            actor = %handle,
            actor_type = handle.short_type_name(),
            lane = index,
            "Actor scheduled"
        );
        self.lanes
            .send(index, self.lanes.fake_index(), ThreadMessage::AddActor { actor: state });
        Ok(())
    }

    /// Ask the owning lane to drop the actor. The actor leaves the map
    /// once the lane has confirmed and the confirmation was drained.
    pub fn remove(&self, handle: &ActorHandle) {
        let _guard = self.external_call_lock.lock();

        let Some(state) = self.actors.read().get(handle).cloned() else {
            return;
        };
        if !state.mark_removed() {
            return;
        }

        let fake = self.lanes.fake_index();
        let lane = state.group();
        debug!(actor = %handle, lane, "Actor removal requested");
        self.lanes.send(
            lane,
            fake,
            ThreadMessage::RemoveActor {
                source: fake,
                actor: state,
            },
        );
    }

    /// Apply every removal confirmed so far
    pub fn process_pending_removals(&self) {
        let _guard = self.external_call_lock.lock();
        self.drain_removals();
    }

    /// Whether the actor is registered, pending removals included
    pub fn contains(&self, handle: &ActorHandle) -> bool {
        self.actors.read().contains_key(handle)
    }

    /// Lane recorded for the actor
    pub fn lane_of(&self, handle: &ActorHandle) -> Option<usize> {
        self.actors.read().get(handle).map(|state| state.group())
    }

    /// Per-lane view of ownership and load
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            lanes: self.lanes.logical().iter().map(|lane| lane.snapshot()).collect(),
        }
    }

    pub fn timings(&self) -> Option<&ActorTimings> {
        self.lanes.timings.as_ref()
    }

    fn logical_lane(&self, index: usize) -> Result<&execution_group::ExecutionGroup> {
        self.lanes.logical().get(index).ok_or(ActorError::InvalidLane {
            index,
            lanes: self.nb_lanes(),
        })
    }

    fn next_non_cooperative_lane(&self, cursor: &mut usize) -> Option<usize> {
        let logical = self.lanes.logical();
        for _ in 0..logical.len() {
            let index = *cursor % logical.len();
            *cursor = cursor.wrapping_add(1);
            if !logical[index].is_cooperative() {
                return Some(index);
            }
        }
        None
    }

    /// Caller holds the external call lock
    fn drain_removals(&self) {
        let mut confirmed = Vec::new();
        self.lanes.fake().drain_with(|message| match message {
            ThreadMessage::RemoveActorResponse { actor } => confirmed.push(actor),
            other => warn!(kind = other.kind(), "Unexpected message on bookkeeping lane"),
        });
        if confirmed.is_empty() {
            return;
        }

        let mut actors = ActorMap::clone(&self.actors.read());
        for state in confirmed {
            let handle = state.handle();
            // A re-added actor has a fresh state; keep it
            if actors.get(handle).is_some_and(|current| Arc::ptr_eq(current, &state)) {
                actors.remove(handle);
                debug!(actor = %handle, "Actor removal confirmed");
            }
        }
        *self.actors.write() = Arc::new(actors);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.lanes.stop();
    }
}
