//! # Nimbusd — task execution & conditional scheduling daemon
//!
//! Runs the worker pool draining the task queue and the timer loop firing
//! due schedules. Provider calls go through the stub adapter until a real
//! one is wired in.
//!
//! Usage:
//!   nimbusd                          # defaults (~/.nimbus/schedules.db)
//!   nimbusd --workers 8 --verbose
//!   nimbusd --config nimbus.toml

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use nimbus_cache::MemoryCache;
use nimbus_core::{MachineInventory, MemoryAuditLog, NimbusConfig};
use nimbus_scheduler::{spawn_timer, GroupRunner, ScheduleStore};
use nimbus_tasks::{
    spawn_workers, DummyProvider, MpscQueue, SessionBus, TaskRegistry, TaskRunner,
};

#[derive(Parser)]
#[command(
    name = "nimbusd",
    version,
    about = "☁️ Nimbus — task execution & conditional scheduling daemon"
)]
struct Cli {
    /// Config file (TOML). Missing file falls back to defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Schedule database path (overrides config)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Timer tick interval in seconds (overrides config)
    #[arg(long)]
    tick_interval: Option<u64>,

    /// Worker count (overrides config)
    #[arg(long)]
    workers: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NimbusConfig::load(path)?,
        None => NimbusConfig::default(),
    };
    if let Some(path) = cli.db_path {
        config.schedule_db_path = path;
    }
    if let Some(secs) = cli.tick_interval {
        config.tick_interval_secs = secs;
    }
    if let Some(count) = cli.workers {
        config.worker_count = count;
    }

    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_filter.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter)),
        )
        .with_target(false)
        .init();

    println!("☁️ Nimbus v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Schedule DB: {}", config.schedule_db_path.display());
    println!("   ⚙️  Workers:     {}", config.worker_count);
    println!("   ⏰ Tick:        {}s", config.tick_interval_secs);
    println!();

    // Task execution side: cache, queue, session bus, worker pool
    let cache = Arc::new(MemoryCache::new());
    let (queue, rx) = MpscQueue::channel();
    let bus = Arc::new(SessionBus::new());
    let audit = Arc::new(MemoryAuditLog::default());
    let inventory = Arc::new(MachineInventory::new());
    let runner = Arc::new(TaskRunner::new(
        TaskRegistry::with_builtin(),
        cache,
        queue,
        bus.clone(),
        Arc::new(DummyProvider),
        audit.clone(),
    ));
    spawn_workers(runner.clone(), rx, config.worker_count);

    // Scheduling side: persistent store, batch runner, timer loop
    let store = Arc::new(ScheduleStore::open(&config.schedule_db_path)?);
    let group = Arc::new(GroupRunner::new(
        runner,
        store.clone(),
        inventory,
        bus,
        audit,
    ));

    spawn_timer(
        store,
        group,
        Duration::from_secs(config.tick_interval_secs),
    )
    .await;
    Ok(())
}
