//! Track command - collect worker results for stored tasks

use crate::style::*;
use anyhow::{Context, Result};
use clap::Args;
use dojo::dojo_api::DojoApi;
use dojo::storage::TaskStore;
use dojo::task_tracker::{TaskTracker, TrackerConfig, TrackerStats};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct TrackArgs {
    #[arg(long, default_value = "dojo.db", env = "DOJO_DB_PATH")]
    pub db: PathBuf,

    /// Validator hotkeys whose tasks are tracked
    #[arg(long = "validator-hotkey", env = "VALIDATOR_HOTKEY", value_delimiter = ',', required = true)]
    pub validator_hotkeys: Vec<String>,

    /// Run a single pass and exit
    #[arg(long)]
    pub once: bool,

    /// Seconds between passes
    #[arg(long, default_value = "30")]
    pub interval: u64,

    /// Seconds before the first pass
    #[arg(long, default_value = "60")]
    pub initial_delay: u64,

    #[arg(long, default_value = "10")]
    pub batch_size: usize,
}

fn print_stats(stats: &TrackerStats) {
    print_section("Tracker pass");
    print_key_value("Batches", &stats.batches.to_string());
    print_key_value("Tasks", &stats.tasks.to_string());
    print_key_value("Completed", &stats.completed.to_string());
    print_key_value("Pending", &stats.pending.to_string());
    print_key_value("Invalid", &stats.invalid.to_string());
    print_key_value("Updated", &stats.updated.to_string());
    if stats.update_failures > 0 {
        print_key_value_colored(
            "Update failures",
            &stats.update_failures.to_string(),
            crate::style::colors::RED,
        );
    }
}

pub async fn run(args: TrackArgs) -> Result<()> {
    dotenv::dotenv().ok();

    let store = TaskStore::open(&args.db)
        .with_context(|| format!("Failed to open task store {}", args.db.display()))?;
    let api = DojoApi::from_env().context("Worker API settings")?;

    let mut config = TrackerConfig::new(String::new());
    config.validator_hotkeys = args.validator_hotkeys;
    config.interval = Duration::from_secs(args.interval);
    config.initial_delay = Duration::from_secs(args.initial_delay);
    config.batch_size = args.batch_size;

    let tracker = TaskTracker::new(config, store, Arc::new(api));

    if args.once {
        let stats = tracker.process_once().await?;
        print_stats(&stats);
        return Ok(());
    }

    let handle = tracker.spawn();
    info!("Task tracker running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    handle.shutdown();
    if let Err(e) = handle.task_handle.await {
        warn!("Task tracker ended abnormally: {}", e);
    }
    print_success("Task tracker stopped");
    Ok(())
}
