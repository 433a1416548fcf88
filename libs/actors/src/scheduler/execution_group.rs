//! Execution Groups (lanes)
//!
//! A lane owns a list of actors and ticks the ready ones within a time
//! budget. Dedicated lanes run their own `exec-group-<i>` thread;
//! cooperative lanes are ticked by the host through `Scheduler::tick`.
//!
//! # Cycle
//!
//! ```text
//! ┌──────────────────┐   ┌────────────────┐   ┌──────────────────┐
//! │ 1. steal request │──►│ 2. drain inbox │──►│ 3. tick ready    │
//! │    (idle lanes)  │   │   (all sources)│   │    actors        │
//! └──────────────────┘   └────────────────┘   └────────┬─────────┘
//!                                                      │
//!        ┌───────────────────┐   ┌───────────────────┐ │
//!        │ 5. publish load   │◄──│ 4. cycle counters │◄┘
//!        └───────────────────┘   └───────────────────┘
//! ```
//!
//! # Ownership
//!
//! The actor list lives behind the lane's local lock, held for the whole
//! cycle by whoever ticks the lane. Other lanes only see the published
//! atomics (`load_factor`, `actor_count`, `is_cooperative`) and talk to the
//! lane through its inboxes, one per sending lane, so every actor hand-off
//! is a message processed by the owning lane.

use super::load::LoadTracker;
use super::message::ThreadMessage;
use super::state::ActorState;
use super::stats::{ActorTimings, LaneSnapshot};
use crate::lifecycle::TickResult;
use crate::queue::SwsrQueue;
use crate::sync::AutoResetEvent;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use runtime_config::SchedulerSettings;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// Every lane plus the bookkeeping lane, shared with the lane threads
pub(crate) struct LaneSet {
    pub(crate) groups: Vec<ExecutionGroup>,
    pub(crate) settings: SchedulerSettings,
    pub(crate) timings: Option<ActorTimings>,
}

impl LaneSet {
    /// `nb_lanes` logical lanes followed by one bookkeeping lane
    pub(crate) fn new(nb_lanes: usize, settings: SchedulerSettings) -> Self {
        let total = nb_lanes + 1;
        let groups = (0..total)
            .map(|index| ExecutionGroup::new(index, total, &settings))
            .collect();
        let timings = settings.actor_timing.then(ActorTimings::new);
        let lanes = Self {
            groups,
            settings,
            timings,
        };
        // Never ticked: only used to route add/remove confirmations
        lanes.fake().set_cooperative();
        lanes
    }

    pub(crate) fn fake_index(&self) -> usize {
        self.groups.len() - 1
    }

    pub(crate) fn fake(&self) -> &ExecutionGroup {
        &self.groups[self.fake_index()]
    }

    /// Logical lanes, bookkeeping lane excluded
    pub(crate) fn logical(&self) -> &[ExecutionGroup] {
        &self.groups[..self.fake_index()]
    }

    pub(crate) fn send(&self, target: usize, source: usize, message: ThreadMessage) {
        self.groups[target].enqueue(source, message, true);
    }

    /// Enqueue without waking the target
    pub(crate) fn post(&self, target: usize, source: usize, message: ThreadMessage) {
        self.groups[target].enqueue(source, message, false);
    }

    pub(crate) fn start(self: &Arc<Self>) {
        for group in self.logical() {
            group.start(self);
        }
    }

    pub(crate) fn stop(&self) {
        for group in self.logical() {
            group.stop();
        }
    }
}

/// Single-owner state of a lane
struct GroupLocal {
    actors: Vec<Arc<ActorState>>,
    next_actor: usize,
    cycles_since_donation: u64,
    cycles_since_steal_request: u64,
    pending_steal_request: bool,
    load: LoadTracker,
    rng: StdRng,
}

pub(crate) struct ExecutionGroup {
    index: usize,
    inboxes: Vec<SwsrQueue<ThreadMessage>>,
    has_pending_messages: AtomicBool,
    load_factor: AtomicU32,
    actor_count: AtomicUsize,
    is_cooperative: AtomicBool,
    is_stopping: AtomicBool,
    signal: AutoResetEvent,
    local: Mutex<GroupLocal>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionGroup {
    fn new(index: usize, nb_groups: usize, settings: &SchedulerSettings) -> Self {
        Self {
            index,
            inboxes: (0..nb_groups).map(|_| SwsrQueue::new()).collect(),
            has_pending_messages: AtomicBool::new(false),
            load_factor: AtomicU32::new(0f32.to_bits()),
            actor_count: AtomicUsize::new(0),
            is_cooperative: AtomicBool::new(false),
            is_stopping: AtomicBool::new(false),
            signal: AutoResetEvent::new(true),
            local: Mutex::new(GroupLocal {
                actors: Vec::new(),
                next_actor: 0,
                cycles_since_donation: 0,
                cycles_since_steal_request: 0,
                pending_steal_request: false,
                load: LoadTracker::new(settings.sample_size, settings.percentile_size()),
                rng: StdRng::from_entropy(),
            }),
            thread: Mutex::new(None),
        }
    }

    pub(crate) fn is_cooperative(&self) -> bool {
        self.is_cooperative.load(Ordering::Acquire)
    }

    pub(crate) fn set_cooperative(&self) {
        self.is_cooperative.store(true, Ordering::Release);
    }

    pub(crate) fn load_factor(&self) -> f32 {
        f32::from_bits(self.load_factor.load(Ordering::Acquire))
    }

    pub(crate) fn actor_count(&self) -> usize {
        self.actor_count.load(Ordering::Acquire)
    }

    pub(crate) fn signal(&self) {
        self.signal.set();
    }

    fn enqueue(&self, source: usize, message: ThreadMessage, wake: bool) {
        trace!(lane = self.index, source, kind = message.kind(), "Enqueue lane message");
        self.inboxes[source].try_enqueue(message);
        self.has_pending_messages.store(true, Ordering::Release);
        if wake {
            self.signal();
        }
    }

    /// Spawn the lane thread. No-op for cooperative or already running lanes.
    fn start(&self, lanes: &Arc<LaneSet>) {
        if self.is_cooperative() {
            return;
        }
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return;
        }

        self.is_stopping.store(false, Ordering::Release);
        let index = self.index;
        let shared = Arc::clone(lanes);
        let spawned = std::thread::Builder::new()
            .name(format!("exec-group-{}", index))
            .spawn(move || shared.groups[index].run(&shared));

        match spawned {
            Ok(handle) => {
                info!(lane = index, "Execution group started");
                *thread = Some(handle);
            }
            Err(e) => error!(lane = index, error = %e, "Failed to spawn execution group thread"),
        }
    }

    /// Stop and join the lane thread. No-op for cooperative or idle lanes.
    fn stop(&self) {
        if self.is_cooperative() {
            return;
        }
        let Some(handle) = self.thread.lock().take() else {
            return;
        };

        self.is_stopping.store(true, Ordering::Release);
        self.signal();
        if handle.join().is_err() {
            error!(lane = self.index, "Execution group thread panicked");
        } else {
            info!(lane = self.index, "Execution group stopped");
        }
        self.is_stopping.store(false, Ordering::Release);
    }

    fn run(&self, lanes: &LaneSet) {
        let cycle = lanes.settings.cycle_time();
        let budget = lanes.settings.tick_budget();
        let idle_wait = lanes.settings.idle_wait();

        while !self.is_stopping.load(Ordering::Acquire) {
            let start = Instant::now();
            let end = start + budget;

            let overloaded = self.cooperative_tick(lanes, start, end);

            if !overloaded {
                if let Some(rest) = cycle.checked_sub(start.elapsed()) {
                    std::thread::sleep(rest);
                }
            }

            // Periodic wake-up so idle lanes keep trying to steal
            self.signal.wait_timeout(idle_wait);
        }
    }

    /// One full cycle. Returns `true` when some actor yielded, i.e. the
    /// lane should run again without sleeping.
    pub(crate) fn cooperative_tick(&self, lanes: &LaneSet, start: Instant, end: Instant) -> bool {
        let mut local = self.local.lock();
        self.execute_work_stealing(&mut local, lanes);
        self.process_incoming_messages(&mut local, lanes);
        self.execute_actors(&mut local, lanes, start, end)
    }

    fn execute_actors(
        &self,
        local: &mut GroupLocal,
        lanes: &LaneSet,
        start: Instant,
        end: Instant,
    ) -> bool {
        let count = local.actors.len();
        let mut everything_processed = true;

        for i in 0..count {
            local.next_actor = (local.next_actor + 1) % count;
            let state = &local.actors[local.next_actor];

            // Removed actors wait for their confirmation without running
            if !state.is_ready() || state.is_removed() {
                continue;
            }

            state.set_ready(false);
            state.record_execution();

            let began = lanes.timings.as_ref().map(|_| Instant::now());
            let result = state.actor.tick(end);
            if let (Some(timings), Some(began)) = (lanes.timings.as_ref(), began) {
                timings.record(
                    state.handle(),
                    state.actor.is_bound_to_main_thread(),
                    began.elapsed(),
                );
            }

            if result == TickResult::Yield {
                state.set_ready(true);
                everything_processed = false;
                // Visit this actor first next cycle so each actor gets a
                // whole cycle at least once every `count` cycles
                if i != 0 {
                    local.next_actor = local.next_actor.checked_sub(1).unwrap_or(count - 1);
                }
                break;
            }
        }

        local.cycles_since_donation += 1;
        local.cycles_since_steal_request += 1;
        for state in &local.actors {
            state.record_cycle();
        }

        if everything_processed {
            let budget = end.saturating_duration_since(start);
            let used = Instant::now().saturating_duration_since(start);
            local.load.push(load_sample(used, budget));
        } else {
            local.load.push(1.0);
            self.signal();
        }

        self.load_factor
            .store(local.load.load_factor().to_bits(), Ordering::Release);

        !everything_processed
    }

    fn process_incoming_messages(&self, local: &mut GroupLocal, lanes: &LaneSet) {
        if !self.has_pending_messages.swap(false, Ordering::AcqRel) {
            return;
        }

        for inbox in &self.inboxes {
            while let Some(message) = inbox.try_dequeue() {
                self.process_message(local, lanes, message);
            }
        }
        self.actor_count.store(local.actors.len(), Ordering::Release);
    }

    fn process_message(&self, local: &mut GroupLocal, lanes: &LaneSet, message: ThreadMessage) {
        match message {
            ThreadMessage::AddActor { actor } => {
                actor.reset_counters();
                debug!(lane = self.index, actor = %actor.handle(), "Actor added to lane");
                local.actors.push(actor);
            }
            ThreadMessage::RemoveActor { source, actor } => {
                let before = local.actors.len();
                local.actors.retain(|owned| !Arc::ptr_eq(owned, &actor));
                if local.actors.len() != before {
                    debug!(lane = self.index, actor = %actor.handle(), "Actor removed from lane");
                    // Picked up by the next scheduler drain, no wake-up
                    lanes.post(source, self.index, ThreadMessage::RemoveActorResponse { actor });
                }
                // Otherwise a steal moved it; the receiving lane sees the
                // removal flag and confirms instead
            }
            ThreadMessage::StealActor { source } => {
                self.find_and_send_stolen_actor(local, lanes, source);
            }
            ThreadMessage::StealActorResponse { actor } => {
                local.pending_steal_request = false;
                if let Some(actor) = actor {
                    actor.set_group(self.index);
                    if actor.is_removed() {
                        lanes.post(
                            lanes.fake_index(),
                            self.index,
                            ThreadMessage::RemoveActorResponse { actor },
                        );
                        return;
                    }
                    debug!(lane = self.index, actor = %actor.handle(), "Stolen actor received");
                    actor.set_ready(true);
                    actor.reset_counters();
                    local.actors.push(actor);
                }
            }
            ThreadMessage::RemoveActorResponse { actor } => {
                panic!(
                    "lane {} received a removal confirmation for {}; only the bookkeeping lane may",
                    self.index,
                    actor.handle()
                );
            }
        }
    }

    fn execute_work_stealing(&self, local: &mut GroupLocal, lanes: &LaneSet) {
        let cooldown = u64::from(lanes.settings.steal_request_cooldown_cycles);
        if self.is_cooperative()
            || local.pending_steal_request
            || local.cycles_since_steal_request < cooldown
            || local.load.max() > lanes.settings.max_local_load_to_steal
        {
            return;
        }

        let Some(target) = self.find_stealing_target(local, lanes) else {
            return;
        };

        local.pending_steal_request = true;
        local.cycles_since_steal_request = 0;
        debug!(lane = self.index, target, "Requesting actor from loaded lane");
        lanes.send(target, self.index, ThreadMessage::StealActor { source: self.index });
    }

    fn find_stealing_target(&self, local: &mut GroupLocal, lanes: &LaneSet) -> Option<usize> {
        let total = lanes.groups.len();
        let start = local.rng.gen_range(0..total - 1);

        (0..total)
            .map(|offset| (start + offset) % total)
            .find(|&index| {
                let group = &lanes.groups[index];
                // Cooperative lanes are never robbed, which keeps
                // main-thread actors on the main thread
                index != self.index
                    && !group.is_cooperative()
                    && group.load_factor() > lanes.settings.min_remote_load_to_steal
                    && group.actor_count() > 1
            })
    }

    fn find_and_send_stolen_actor(&self, local: &mut GroupLocal, lanes: &LaneSet, source: usize) {
        let sample_size = lanes.settings.sample_size as u64;

        let donated = if local.cycles_since_donation < sample_size || local.actors.len() < 2 {
            None
        } else {
            // Lightest actor with enough history to judge
            local
                .actors
                .iter()
                .enumerate()
                .filter(|(_, state)| state.nb_cycles() >= sample_size * 2)
                .min_by(|(_, a), (_, b)| a.execution_ratio().total_cmp(&b.execution_ratio()))
                .map(|(index, _)| index)
        };

        let actor = donated.map(|index| {
            local.cycles_since_donation = 0;
            let actor = local.actors.remove(index);
            debug!(lane = self.index, target = source, actor = %actor.handle(), "Donating actor");
            actor
        });
        self.actor_count.store(local.actors.len(), Ordering::Release);

        lanes.send(source, self.index, ThreadMessage::StealActorResponse { actor });
    }

    /// Drain every inbox through `callback` without ticking. Used on the
    /// bookkeeping lane, which never runs.
    pub(crate) fn drain_with(&self, mut callback: impl FnMut(ThreadMessage)) {
        if !self.has_pending_messages.swap(false, Ordering::AcqRel) {
            return;
        }
        for inbox in &self.inboxes {
            while let Some(message) = inbox.try_dequeue() {
                callback(message);
            }
        }
    }

    /// Blocks while the lane is mid-cycle
    pub(crate) fn snapshot(&self) -> LaneSnapshot {
        let local = self.local.lock();
        LaneSnapshot {
            index: self.index,
            is_cooperative: self.is_cooperative(),
            load_factor: self.load_factor(),
            actors: local
                .actors
                .iter()
                .filter(|state| !state.is_removed())
                .map(|state| state.handle().clone())
                .collect(),
        }
    }
}

fn load_sample(used: Duration, budget: Duration) -> f32 {
    if budget.is_zero() {
        return 1.0;
    }
    (used.as_secs_f64() / budget.as_secs_f64()).min(1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{Actor, Lifecycle};

    struct Spinner {
        yields: u32,
    }

    impl Lifecycle for Spinner {
        fn tick(&mut self, _deadline: Instant) -> TickResult {
            if self.yields > 0 {
                self.yields -= 1;
                TickResult::Yield
            } else {
                TickResult::Wait
            }
        }
    }

    fn lanes(nb_lanes: usize) -> LaneSet {
        LaneSet::new(nb_lanes, SchedulerSettings::with_lanes(nb_lanes))
    }

    fn add(lanes: &LaneSet, lane: usize, actor: Actor) -> Arc<ActorState> {
        let state = Arc::new(ActorState::new(actor, lane));
        lanes.send(lane, lanes.fake_index(), ThreadMessage::AddActor { actor: state.clone() });
        state
    }

    fn tick(lanes: &LaneSet, lane: usize) -> bool {
        let start = Instant::now();
        lanes.groups[lane].cooperative_tick(lanes, start, start + Duration::from_millis(9))
    }

    #[test]
    fn test_fake_lane_is_cooperative() {
        let lanes = lanes(2);
        assert_eq!(lanes.groups.len(), 3);
        assert!(lanes.fake().is_cooperative());
        assert_eq!(lanes.logical().len(), 2);
    }

    #[test]
    fn test_add_then_tick() {
        let lanes = lanes(1);
        lanes.groups[0].set_cooperative();
        let state = add(&lanes, 0, Actor::new(Spinner { yields: 0 }));

        assert!(!tick(&lanes, 0));
        assert_eq!(lanes.groups[0].actor_count(), 1);
        assert!(!state.is_ready());
        assert_eq!(state.nb_cycles(), 1);
    }

    #[test]
    fn test_yield_marks_overloaded() {
        let lanes = lanes(1);
        lanes.groups[0].set_cooperative();
        let state = add(&lanes, 0, Actor::new(Spinner { yields: 1 }));

        assert!(tick(&lanes, 0));
        assert!(state.is_ready());
        assert_eq!(lanes.groups[0].load_factor(), 1.0 / 4.0);

        assert!(!tick(&lanes, 0));
        assert!(!state.is_ready());
    }

    #[test]
    fn test_remove_confirms_to_fake_lane() {
        let lanes = lanes(1);
        lanes.groups[0].set_cooperative();
        let state = add(&lanes, 0, Actor::new(Spinner { yields: 0 }));
        tick(&lanes, 0);

        state.mark_removed();
        lanes.send(
            0,
            lanes.fake_index(),
            ThreadMessage::RemoveActor {
                source: lanes.fake_index(),
                actor: state.clone(),
            },
        );
        tick(&lanes, 0);
        assert_eq!(lanes.groups[0].actor_count(), 0);

        let mut confirmed = Vec::new();
        lanes.fake().drain_with(|message| confirmed.push(message));
        assert!(matches!(
            confirmed.as_slice(),
            [ThreadMessage::RemoveActorResponse { actor }] if Arc::ptr_eq(actor, &state)
        ));
    }

    #[test]
    fn test_donor_refuses_without_history() {
        let lanes = lanes(2);
        lanes.groups[0].set_cooperative();
        add(&lanes, 1, Actor::new(Spinner { yields: 0 }));
        add(&lanes, 1, Actor::new(Spinner { yields: 0 }));

        lanes.send(1, 0, ThreadMessage::StealActor { source: 0 });
        lanes.groups[1].cooperative_tick(&lanes, Instant::now(), Instant::now());
        assert_eq!(lanes.groups[1].actor_count(), 2);

        let reply = lanes.groups[0].inboxes[1].try_dequeue();
        assert!(matches!(reply, Some(ThreadMessage::StealActorResponse { actor: None })));
    }

    #[test]
    fn test_donor_gives_lightest_actor() {
        let lanes = lanes(2);
        lanes.groups[0].set_cooperative();
        lanes.groups[1].set_cooperative();
        let light = add(&lanes, 1, Actor::new(Spinner { yields: 0 }));
        let heavy = add(&lanes, 1, Actor::new(Spinner { yields: u32::MAX }));

        for _ in 0..40 {
            tick(&lanes, 1);
        }

        lanes.send(1, 0, ThreadMessage::StealActor { source: 0 });
        tick(&lanes, 1);
        assert_eq!(lanes.groups[1].actor_count(), 1);

        match lanes.groups[0].inboxes[1].try_dequeue() {
            Some(ThreadMessage::StealActorResponse { actor: Some(actor) }) => {
                assert!(Arc::ptr_eq(&actor, &light));
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(lanes.groups[1].snapshot().actors, vec![heavy.handle().clone()]);
    }

    #[test]
    fn test_stolen_removed_actor_is_confirmed_not_adopted() {
        let lanes = lanes(2);
        lanes.groups[0].set_cooperative();
        let state = Arc::new(ActorState::new(Actor::new(Spinner { yields: 0 }), 1));
        state.mark_removed();

        lanes.send(0, 1, ThreadMessage::StealActorResponse { actor: Some(state.clone()) });
        tick(&lanes, 0);
        assert_eq!(lanes.groups[0].actor_count(), 0);
        assert_eq!(state.group(), 0);

        let mut confirmed = 0;
        lanes.fake().drain_with(|message| {
            if matches!(message, ThreadMessage::RemoveActorResponse { .. }) {
                confirmed += 1;
            }
        });
        assert_eq!(confirmed, 1);
    }

    #[test]
    #[should_panic(expected = "bookkeeping lane")]
    fn test_removal_confirmation_on_ticking_lane_panics() {
        let lanes = lanes(1);
        let state = Arc::new(ActorState::new(Actor::new(Spinner { yields: 0 }), 0));
        lanes.send(0, 1, ThreadMessage::RemoveActorResponse { actor: state });
        tick(&lanes, 0);
    }

    #[test]
    fn test_load_sample() {
        assert_eq!(load_sample(Duration::from_millis(3), Duration::ZERO), 1.0);
        assert_eq!(load_sample(Duration::from_millis(20), Duration::from_millis(10)), 1.0);
        let half = load_sample(Duration::from_millis(5), Duration::from_millis(10));
        assert!((half - 0.5).abs() < 1e-6);
    }
}
