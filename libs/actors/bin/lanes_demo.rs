//! Lanes demo - drives lane 0 from main while background lanes balance work
//!
//! Usage:
//!   lanes-demo --seconds 5 --crunchers 8
//!   lanes-demo --config config/runtime.toml --log-level debug

use actor_runtime::{
    Actor, ActorSystem, ComponentTicker, Components, Lifecycle, Scheduler, TickResult,
    TimerComponent,
};
use anyhow::{Context, Result};
use clap::Parser;
use runtime_config::{init_tracing, RuntimeConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "lanes-demo")]
#[command(about = "Actor runtime lane scheduling demo")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of lanes, overrides the configuration
    #[arg(long)]
    lanes: Option<usize>,

    /// How long the host loop runs
    #[arg(short, long, default_value_t = 3)]
    seconds: u64,

    /// Number of background actors with heavy work
    #[arg(long, default_value_t = 6)]
    crunchers: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

/// Main-thread actor counting host frames
#[derive(Default)]
struct FrameCounter {
    frames: u64,
}

impl Lifecycle for FrameCounter {
    fn tick(&mut self, _deadline: Instant) -> TickResult {
        self.frames += 1;
        // Ticked every host frame
        TickResult::Yield
    }
}

/// Burns through work units until the deadline
struct Cruncher {
    backlog: Arc<AtomicU64>,
    processed: u64,
}

impl Lifecycle for Cruncher {
    fn tick(&mut self, deadline: Instant) -> TickResult {
        while Instant::now() < deadline {
            let left = self.backlog.load(Ordering::Relaxed);
            if left == 0 {
                return TickResult::Wait;
            }
            self.backlog.store(left - 1, Ordering::Relaxed);
            self.processed += 1;
            std::hint::black_box((0..2_000u64).fold(0u64, |acc, x| acc.wrapping_add(x * x)));
        }
        TickResult::Yield
    }
}

/// Refills the crunchers' backlogs on a timer
struct Feeder {
    ticker: ComponentTicker,
    rounds: Arc<AtomicU64>,
}

impl Lifecycle for Feeder {
    fn start(&mut self) -> actor_runtime::Result<()> {
        info!("Feeder started");
        Ok(())
    }

    fn tick(&mut self, deadline: Instant) -> TickResult {
        self.ticker.tick(deadline)
    }
}

/// Re-arms itself after every feed until the timer is gone
fn schedule_feed(
    timer: Weak<TimerComponent>,
    backlogs: Arc<Vec<Arc<AtomicU64>>>,
    rounds: Arc<AtomicU64>,
) {
    let Some(strong) = timer.upgrade() else {
        return;
    };
    strong.delayed_execute(Duration::from_millis(250), move || {
        for backlog in backlogs.iter() {
            backlog.fetch_add(500, Ordering::Relaxed);
        }
        rounds.fetch_add(1, Ordering::Relaxed);
        schedule_feed(timer, backlogs, rounds);
    });
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        RuntimeConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    config.logging.json |= args.json_logs;
    if let Some(lanes) = args.lanes {
        config.scheduler.lanes = Some(lanes);
    }
    if !config.scheduler.cooperative_lanes.contains(&0) {
        config.scheduler.cooperative_lanes.push(0);
    }
    init_tracing(&config.logging)?;

    info!("Starting lanes demo");
    let scheduler = Arc::new(Scheduler::with_settings(config.scheduler.clone())?);
    let mut system = ActorSystem::with_settings(scheduler.clone(), config.system.clone())?;

    let frames = system.add(
        Actor::new(FrameCounter::default()).bound_to_main_thread(),
        Components::new(),
    )?;

    let mut backlogs = Vec::new();
    let mut crunchers = Vec::new();
    for _ in 0..args.crunchers {
        let backlog = Arc::new(AtomicU64::new(2_000));
        backlogs.push(backlog.clone());
        let actor = Actor::new(Cruncher {
            backlog,
            processed: 0,
        });
        crunchers.extend(actor.state::<Cruncher>());
        system.add(actor, Components::new())?;
    }

    let timer = TimerComponent::new(system.runtime().clone(), system.token());
    let components = Components::new().with_async(timer.clone());
    let rounds = Arc::new(AtomicU64::new(0));
    system.add(
        Actor::new(Feeder {
            ticker: components.ticker(),
            rounds: rounds.clone(),
        }),
        components,
    )?;

    system.start()?;
    schedule_feed(Arc::downgrade(&timer), Arc::new(backlogs), rounds.clone());

    let budget = scheduler.settings().tick_budget();
    let cycle = scheduler.settings().cycle_time();
    let until = Instant::now() + Duration::from_secs(args.seconds);
    while Instant::now() < until {
        let start = Instant::now();
        scheduler.tick(start, start + budget, 0)?;
        if let Some(rest) = cycle.checked_sub(start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    let snapshot = scheduler.snapshot();
    for lane in &snapshot.lanes {
        info!(
            lane = lane.index,
            cooperative = lane.is_cooperative,
            load = lane.load_factor,
            actors = lane.actors.len(),
            "Lane summary"
        );
    }

    let frame_count = system.actor_state::<FrameCounter>()?.lock().frames;
    let processed: u64 = crunchers.iter().map(|state| state.lock().processed).sum();
    let feeder_rounds = system.actor_state::<Feeder>()?.lock().rounds.load(Ordering::Relaxed);
    info!(
        frames = frame_count,
        frame_actor = %frames,
        processed,
        feed_rounds = feeder_rounds,
        "Demo finished"
    );

    system.shutdown()?;
    Ok(())
}
