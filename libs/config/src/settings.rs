//! Runtime Settings
//!
//! Typed settings for the scheduler, the actor system and logging.
//! Loaded from an optional TOML file with `ACTOR_RUNTIME__*` environment
//! overrides layered on top. Every field has a default, so an empty file
//! (or no file at all) yields a working configuration.
//!
//! ```toml
//! [scheduler]
//! lanes = 4
//! cooperative_lanes = [0]
//! cycle_time_ms = 10
//! actor_timing = true
//! timing_report_path = "$HOME/actor-timings.txt"
//!
//! [system]
//! drain_timeout_ms = 5000
//!
//! [logging]
//! level = "debug"
//! ```

use crate::logging::LoggingSettings;
use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable prefix, e.g. `ACTOR_RUNTIME__SCHEDULER__LANES=8`
pub const ENV_PREFIX: &str = "ACTOR_RUNTIME";

/// Top level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub scheduler: SchedulerSettings,
    pub system: SystemSettings,
    pub logging: LoggingSettings,
}

/// Scheduler and execution lane tuning
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Number of logical lanes. `None` uses the available parallelism.
    pub lanes: Option<usize>,

    /// Lanes ticked by the host instead of a dedicated thread
    pub cooperative_lanes: Vec<usize>,

    /// Period of one lane cycle
    pub cycle_time_ms: u64,

    /// Share of the cycle left idle; the rest is the tick budget
    pub cycle_sleep_ratio: f64,

    /// Upper bound on how long an idle lane sleeps before re-checking
    pub idle_wait_ms: u64,

    /// Number of load samples kept per lane
    pub sample_size: usize,

    /// A peer must advertise more than this load to be asked for an actor
    pub min_remote_load_to_steal: f32,

    /// A lane only steals while all its recent samples stay at or below this
    pub max_local_load_to_steal: f32,

    /// Minimum cycles between two steal requests from the same lane
    pub steal_request_cooldown_cycles: u32,

    /// Accumulate wall time per actor type
    pub actor_timing: bool,

    /// Where `Scheduler::shutdown` writes the timing report
    pub timing_report_path: Option<PathBuf>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            lanes: None,
            cooperative_lanes: Vec::new(),
            cycle_time_ms: 10,
            cycle_sleep_ratio: 0.1,
            idle_wait_ms: 100,
            sample_size: 16,
            min_remote_load_to_steal: 0.90,
            max_local_load_to_steal: 0.80,
            steal_request_cooldown_cycles: 3,
            actor_timing: false,
            timing_report_path: None,
        }
    }
}

impl SchedulerSettings {
    /// Settings with a fixed lane count and everything else defaulted
    pub fn with_lanes(lanes: usize) -> Self {
        Self {
            lanes: Some(lanes),
            ..Self::default()
        }
    }

    /// Configured lane count, or the machine's parallelism
    pub fn resolved_lanes(&self) -> usize {
        self.lanes.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time_ms)
    }

    /// Time a lane may spend ticking actors in one cycle
    pub fn tick_budget(&self) -> Duration {
        let nanos = self.cycle_time().as_nanos() as f64 * (1.0 - self.cycle_sleep_ratio);
        Duration::from_nanos(nanos.round() as u64)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    /// Number of samples averaged into the advertised load factor
    pub fn percentile_size(&self) -> usize {
        (self.sample_size / 4).max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lanes == Some(0) {
            bail!("scheduler.lanes must be at least 1");
        }
        if self.sample_size == 0 {
            bail!("scheduler.sample_size must be at least 1");
        }
        if self.cycle_time_ms == 0 {
            bail!("scheduler.cycle_time_ms must be at least 1");
        }
        if !(0.0..1.0).contains(&self.cycle_sleep_ratio) {
            bail!(
                "scheduler.cycle_sleep_ratio must be in [0, 1), got {}",
                self.cycle_sleep_ratio
            );
        }
        if !(0.0..=1.0).contains(&self.max_local_load_to_steal)
            || !(0.0..=1.0).contains(&self.min_remote_load_to_steal)
        {
            bail!("scheduler steal thresholds must be in [0, 1]");
        }
        if self.max_local_load_to_steal > self.min_remote_load_to_steal {
            bail!(
                "scheduler.max_local_load_to_steal ({}) exceeds min_remote_load_to_steal ({})",
                self.max_local_load_to_steal,
                self.min_remote_load_to_steal
            );
        }
        let lanes = self.resolved_lanes();
        if let Some(bad) = self.cooperative_lanes.iter().find(|&&lane| lane >= lanes) {
            bail!("scheduler.cooperative_lanes contains {bad} but only {lanes} lanes exist");
        }
        Ok(())
    }
}

/// Actor system settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SystemSettings {
    /// How long `stop` waits for async drain tasks
    pub drain_timeout_ms: u64,

    /// Worker threads of the runtime owned by the actor system
    pub async_worker_threads: usize,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 5_000,
            async_worker_threads: 2,
        }
    }
}

impl SystemSettings {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl RuntimeConfig {
    /// Load configuration from an optional file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?;

        let mut parsed: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        parsed.expand_paths()?;
        parsed.scheduler.validate()?;
        Ok(parsed)
    }

    pub(crate) fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading runtime config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        } else {
            debug!("No runtime config file given, using defaults");
        }

        builder = builder.add_source(
            Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut parsed: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        parsed.expand_paths()?;
        parsed.scheduler.validate()?;
        Ok(parsed)
    }

    /// Expand `~` and `$VARS` in path values
    pub fn expand_paths(&mut self) -> Result<()> {
        if let Some(path) = &self.scheduler.timing_report_path {
            let raw = path.to_string_lossy();
            let expanded =
                shellexpand::full(&raw).context("Failed to expand timing report path")?;
            self.scheduler.timing_report_path = Some(PathBuf::from(expanded.as_ref()));
        }
        Ok(())
    }

    /// Render the effective configuration
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// Convenience function to load configuration from an optional file
pub fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    RuntimeConfig::load(path)
}
