//! Per-actor-type tick timing and scheduler snapshots.

use crate::error::{ActorError, Result};
use crate::handle::ActorHandle;
use dashmap::DashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
struct TypeTiming {
    bound_to_main_thread: bool,
    total: Duration,
}

/// Wall time spent in `tick`, accumulated per actor type across lanes
#[derive(Debug, Default)]
pub struct ActorTimings {
    by_type: DashMap<&'static str, TypeTiming>,
}

impl ActorTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, handle: &ActorHandle, bound_to_main_thread: bool, elapsed: Duration) {
        let mut entry = self.by_type.entry(handle.short_type_name()).or_default();
        entry.bound_to_main_thread = bound_to_main_thread;
        entry.total += elapsed;
    }

    pub fn total_for(&self, type_name: &str) -> Option<Duration> {
        self.by_type.get(type_name).map(|timing| timing.total)
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Main-thread types first, then by descending total time
    pub fn render_report(&self) -> String {
        let mut rows: Vec<(&'static str, TypeTiming)> = self
            .by_type
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        rows.sort_by(|(_, a), (_, b)| {
            b.bound_to_main_thread
                .cmp(&a.bound_to_main_thread)
                .then(b.total.cmp(&a.total))
        });

        let mut report = String::new();
        if rows.is_empty() {
            return report;
        }

        report.push_str("Main thread actors:\n");
        let mut in_background_section = false;
        for (name, timing) in rows {
            if !in_background_section && !timing.bound_to_main_thread {
                in_background_section = true;
                report.push_str("\nBackground thread actors:\n");
            }
            let millis = timing.total.as_nanos() as f64 / 1_000_000.0;
            report.push_str(&format!("{}:\t{}\tms\n", name, millis));
        }
        report
    }

    pub fn write_report(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render_report()).map_err(|e| {
            ActorError::io(format!("failed to write timing report to {}", path.display()), e)
        })?;
        info!(path = %path.display(), types = self.by_type.len(), "Actor timing report written");
        Ok(())
    }
}

/// Point-in-time view of one lane
#[derive(Debug, Clone)]
pub struct LaneSnapshot {
    pub index: usize,
    pub is_cooperative: bool,
    pub load_factor: f32,
    pub actors: Vec<ActorHandle>,
}

/// Point-in-time view of every logical lane
#[derive(Debug, Clone)]
pub struct SchedulerSnapshot {
    pub lanes: Vec<LaneSnapshot>,
}

impl SchedulerSnapshot {
    pub fn actor_count(&self) -> usize {
        self.lanes.iter().map(|lane| lane.actors.len()).sum()
    }

    /// Lane currently holding `handle`, if any
    pub fn lane_of(&self, handle: &ActorHandle) -> Option<usize> {
        self.lanes
            .iter()
            .find(|lane| lane.actors.contains(handle))
            .map(|lane| lane.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Renderer;
    struct Physics;
    struct Loader;

    #[test]
    fn test_report_layout() {
        let timings = ActorTimings::new();
        timings.record(&ActorHandle::new::<Loader>(), false, Duration::from_millis(5));
        timings.record(&ActorHandle::new::<Physics>(), false, Duration::from_millis(20));
        timings.record(&ActorHandle::new::<Renderer>(), true, Duration::from_millis(1));
        timings.record(&ActorHandle::new::<Loader>(), false, Duration::from_millis(5));

        assert_eq!(timings.total_for("Loader"), Some(Duration::from_millis(10)));

        let report = timings.render_report();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Main thread actors:",
                "Renderer:\t1\tms",
                "",
                "Background thread actors:",
                "Physics:\t20\tms",
                "Loader:\t10\tms",
            ]
        );
    }

    #[test]
    fn test_empty_report() {
        assert!(ActorTimings::new().render_report().is_empty());
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actor_times.txt");
        let timings = ActorTimings::new();
        timings.record(&ActorHandle::new::<Physics>(), false, Duration::from_millis(2));
        timings.write_report(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("Physics:\t2\tms"));
    }
}
