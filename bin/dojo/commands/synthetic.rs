//! Synthetic command - publish one synthetic task to the worker API

use crate::style::*;
use anyhow::{Context, Result};
use clap::Args;
use dojo::dojo_api::DojoApi;
use dojo::synthetic::{create_synthetic_tasks, SyntheticApi};
use std::time::Duration;

#[derive(Args, Debug)]
pub struct SyntheticArgs {
    /// Skip the obfuscated copy of the task
    #[arg(long)]
    pub no_obfuscate: bool,

    /// Task lifetime in hours
    #[arg(long, default_value = "8")]
    pub expire_hours: u64,

    /// Load this env file before reading the API settings
    #[arg(long)]
    pub env_file: Option<std::path::PathBuf>,
}

pub async fn run(args: SyntheticArgs) -> Result<()> {
    match &args.env_file {
        Some(path) => {
            dotenv::from_path(path).with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => {
            dotenv::dotenv().ok();
        }
    }

    let api = DojoApi::from_env().context("Worker API settings")?;
    let synthetic = SyntheticApi::from_env()?;

    print_header("Synthetic task");
    print_key_value("Worker API", api.base_url());

    let outcome = create_synthetic_tasks(
        &api,
        &synthetic,
        !args.no_obfuscate,
        Duration::from_secs(args.expire_hours * 3600),
    )
    .await?;

    for id in &outcome.task_ids {
        print_success(&format!("Created task {}", id));
    }
    for id in &outcome.obfuscated_task_ids {
        print_success(&format!("Created obfuscated task {}", id));
    }
    Ok(())
}
