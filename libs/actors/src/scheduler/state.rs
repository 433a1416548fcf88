//! Scheduler-side bookkeeping for one actor.

use crate::handle::ActorHandle;
use crate::lifecycle::Actor;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Owned by exactly one lane at a time. `group` changes only when that
/// lane processes an ownership message.
pub(crate) struct ActorState {
    pub(crate) actor: Actor,
    group: AtomicUsize,
    is_ready: AtomicBool,
    removed: AtomicBool,
    nb_executions: AtomicU64,
    nb_cycles: AtomicU64,
}

impl ActorState {
    pub(crate) fn new(actor: Actor, group: usize) -> Self {
        Self {
            actor,
            group: AtomicUsize::new(group),
            is_ready: AtomicBool::new(true),
            removed: AtomicBool::new(false),
            nb_executions: AtomicU64::new(0),
            nb_cycles: AtomicU64::new(0),
        }
    }

    pub(crate) fn handle(&self) -> &ActorHandle {
        self.actor.handle()
    }

    pub(crate) fn group(&self) -> usize {
        self.group.load(Ordering::SeqCst)
    }

    pub(crate) fn set_group(&self, group: usize) {
        self.group.store(group, Ordering::SeqCst);
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::Acquire)
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.is_ready.store(ready, Ordering::Release);
    }

    /// Set once by `Scheduler::remove`; a lane receiving a flagged actor
    /// through a steal drops it and confirms the removal itself.
    pub(crate) fn mark_removed(&self) -> bool {
        !self.removed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    pub(crate) fn record_execution(&self) {
        self.nb_executions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cycle(&self) {
        self.nb_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn nb_cycles(&self) -> u64 {
        self.nb_cycles.load(Ordering::Relaxed)
    }

    /// Executions per observed cycle; low means a light actor
    pub(crate) fn execution_ratio(&self) -> f32 {
        let cycles = self.nb_cycles();
        if cycles == 0 {
            return 0.0;
        }
        self.nb_executions.load(Ordering::Relaxed) as f32 / cycles as f32
    }

    pub(crate) fn reset_counters(&self) {
        self.nb_executions.store(0, Ordering::Relaxed);
        self.nb_cycles.store(0, Ordering::Relaxed);
    }
}
