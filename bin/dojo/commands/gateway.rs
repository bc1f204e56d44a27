//! Gateway command - serve the external task intake

use anyhow::{bail, Context, Result};
use clap::Args;
use dojo::gateway::{serve, StorageSubmitter};
use dojo::hotkey::is_valid_ss58_hotkey;
use dojo::storage::TaskStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Args, Debug)]
pub struct GatewayArgs {
    #[arg(long, default_value = "0.0.0.0", env = "GATEWAY_HOST")]
    pub host: String,

    #[arg(short, long, default_value = "5003", env = "GATEWAY_PORT")]
    pub port: u16,

    /// SQLite task store
    #[arg(long, default_value = "dojo.db", env = "DOJO_DB_PATH")]
    pub db: PathBuf,

    /// Hotkey external tasks are stored under
    #[arg(long, env = "VALIDATOR_HOTKEY")]
    pub validator_hotkey: String,
}

pub async fn run(args: GatewayArgs) -> Result<()> {
    if !is_valid_ss58_hotkey(&args.validator_hotkey) {
        bail!("Invalid validator hotkey: {}", args.validator_hotkey);
    }

    let store = TaskStore::open(&args.db)
        .with_context(|| format!("Failed to open task store {}", args.db.display()))?;
    info!("Task store: {}", args.db.display());

    let submitter = Arc::new(StorageSubmitter::new(store, args.validator_hotkey));
    serve(submitter, &args.host, args.port).await
}
