//! Property tests for load accounting and lane fairness

use actor_runtime::{Actor, Lifecycle, LoadTracker, Scheduler, TickResult};
use proptest::prelude::*;
use std::time::Instant;

#[derive(Default)]
struct Busy {
    ticks: u32,
}

impl Lifecycle for Busy {
    fn tick(&mut self, _deadline: Instant) -> TickResult {
        self.ticks += 1;
        TickResult::Yield
    }
}

fn any_sample() -> impl Strategy<Value = f32> {
    prop_oneof![
        8 => 0.0f32..=1.0,
        1 => -10.0f32..10.0,
        1 => Just(f32::NAN),
    ]
}

proptest! {
    #[test]
    fn load_factor_stays_within_bounds(
        sample_size in 1usize..64,
        samples in prop::collection::vec(any_sample(), 0..200),
    ) {
        let mut tracker = LoadTracker::new(sample_size, (sample_size / 4).max(1));
        for sample in samples {
            tracker.push(sample);
        }

        let load = tracker.load_factor();
        prop_assert!((0.0..=1.0).contains(&load));
        prop_assert!(load <= tracker.max() + 1e-6);
    }

    #[test]
    fn saturated_window_reports_full_load(
        sample_size in 1usize..64,
        history in prop::collection::vec(0.0f32..=1.0, 0..100),
    ) {
        let mut tracker = LoadTracker::new(sample_size, (sample_size / 4).max(1));
        for sample in history {
            tracker.push(sample);
        }
        for _ in 0..sample_size {
            tracker.push(1.0);
        }

        prop_assert_eq!(tracker.load_factor(), 1.0);
    }

    #[test]
    fn yielding_actors_get_equal_turns(actors in 1usize..8, rounds in 1u32..10) {
        let scheduler = Scheduler::new(1);
        scheduler.set_periodic_ticking_thread(0).unwrap();

        let registered: Vec<Actor> = (0..actors).map(|_| Actor::new(Busy::default())).collect();
        for actor in &registered {
            scheduler.add(actor, Some(0)).unwrap();
        }

        for _ in 0..(actors as u32 * rounds) {
            let start = Instant::now();
            scheduler.tick(start, start, 0).unwrap();
        }

        for actor in &registered {
            prop_assert_eq!(actor.state::<Busy>().unwrap().lock().ticks, rounds);
        }
    }
}
