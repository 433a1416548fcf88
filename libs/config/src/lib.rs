//! # Runtime Configuration
//!
//! Settings and logging setup for the actor runtime.
//!
//! ## Features
//!
//! - **Scheduler settings**: lane count, cycle timing, work-stealing thresholds
//! - **System settings**: drain timeout, async worker threads
//! - **Logging**: `tracing-subscriber` initialisation with `RUST_LOG` override
//!
//! ## Usage
//!
//! ```rust,no_run
//! use runtime_config::{init_tracing, load_config};
//!
//! let config = load_config(None)?;
//! init_tracing(&config.logging)?;
//! println!("{} lanes", config.scheduler.resolved_lanes());
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod logging;
pub mod settings;

pub use logging::{init_tracing, LoggingSettings};
pub use settings::{load_config, RuntimeConfig, SchedulerSettings, SystemSettings, ENV_PREFIX};
