//! Neuron Configuration
//!
//! Runtime settings of a miner or validator neuron:
//! - Common options (netuid, device, epoch length, logging dir)
//! - Validator options (sampling, weights, moving average)
//! - Miner options (scoring method, blacklist policy)
//! - Weights & Biases run description

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{DojoError, Result};

/// Projects a W&B run may log to
pub const WANDB_PROJECTS: [&str; 3] = ["dojo-devnet", "dojo-testnet", "dojo-mainnet"];

pub const WANDB_ENTITY: &str = "dojo-subnet";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NeuronType {
    Miner,
    Validator,
}

impl fmt::Display for NeuronType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NeuronType::Miner => f.write_str("miner"),
            NeuronType::Validator => f.write_str("validator"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    HfModel,
    LlmApi,
    HumanFeedback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorOptions {
    /// Base path to store data to
    pub data_base_path: PathBuf,
    pub num_concurrent_forwards: u32,
    /// Miners queried in a single step
    pub sample_size: u32,
    pub disable_set_weights: bool,
    /// How much of a new observation goes into the moving average
    pub moving_average_alpha: f64,
    pub axon_off: bool,
    pub vpermit_tao_limit: u64,
    pub dendrite_timeout_secs: u64,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            data_base_path: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            num_concurrent_forwards: 1,
            sample_size: 10,
            disable_set_weights: false,
            moving_average_alpha: 0.05,
            axon_off: false,
            vpermit_tao_limit: 4096,
            dendrite_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerOptions {
    pub scoring_method: Option<ScoringMethod>,
    /// Require a validator permit on incoming requests
    pub force_validator_permit: bool,
    /// Accept queries from non registered entities
    pub allow_non_registered: bool,
}

impl Default for MinerOptions {
    fn default() -> Self {
        Self {
            scoring_method: None,
            force_validator_permit: true,
            allow_non_registered: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuronConfig {
    pub netuid: u16,
    pub neuron_type: NeuronType,
    pub name: String,
    pub device: String,
    /// How often weights are set, in 12 second blocks
    pub epoch_length: u64,
    pub events_retention_size: String,
    pub logging_dir: String,
    pub validator: Option<ValidatorOptions>,
    pub miner: Option<MinerOptions>,
}

impl NeuronConfig {
    fn base(neuron_type: NeuronType) -> Self {
        Self {
            netuid: 1,
            neuron_type,
            name: neuron_type.to_string(),
            device: "cpu".to_string(),
            epoch_length: 100,
            events_retention_size: "2 GB".to_string(),
            logging_dir: "~/.bittensor/miners".to_string(),
            validator: None,
            miner: None,
        }
    }

    pub fn miner() -> Self {
        Self {
            miner: Some(MinerOptions::default()),
            ..Self::base(NeuronType::Miner)
        }
    }

    pub fn validator() -> Self {
        Self {
            validator: Some(ValidatorOptions::default()),
            ..Self::base(NeuronType::Validator)
        }
    }

    /// `<logging_dir>/<wallet>/<hotkey>/netuid<netuid>/<name>`
    pub fn full_path(&self, wallet_name: &str, wallet_hotkey: &str) -> PathBuf {
        expand_home(&self.logging_dir)
            .join(wallet_name)
            .join(wallet_hotkey)
            .join(format!("netuid{}", self.netuid))
            .join(&self.name)
    }

    /// Resolve the neuron directory and create it if missing
    pub fn ensure_full_path(&self, wallet_name: &str, wallet_hotkey: &str) -> Result<PathBuf> {
        let path = self.full_path(wallet_name, wallet_hotkey);
        if !path.exists() {
            std::fs::create_dir_all(&path)?;
            info!("Created neuron directory {:?}", path);
        }
        Ok(path)
    }
}

/// Command-line form of `NeuronConfig`
#[derive(Args, Debug, Clone)]
pub struct NeuronArgs {
    /// Subnet netuid
    #[arg(long, default_value = "1", env = "NETUID")]
    pub netuid: u16,

    /// Whether running a miner or validator
    #[arg(long, value_enum, default_value = "miner", env = "NEURON_TYPE")]
    pub neuron_type: NeuronType,

    /// Neuron name, defaults to the neuron type
    #[arg(long)]
    pub neuron_name: Option<String>,

    #[arg(long, default_value = "cpu")]
    pub device: String,

    /// How often weights are set, in 12 second blocks
    #[arg(long, default_value = "100")]
    pub epoch_length: u64,

    #[arg(long, default_value = "~/.bittensor/miners", env = "LOGGING_DIR")]
    pub logging_dir: String,

    /// Validator: miners queried in a single step
    #[arg(long)]
    pub sample_size: Option<u32>,

    /// Validator: moving average alpha
    #[arg(long)]
    pub moving_average_alpha: Option<f64>,

    /// Validator: disable setting weights
    #[arg(long)]
    pub disable_set_weights: bool,

    /// Validator: do not serve an axon
    #[arg(long)]
    pub axon_off: bool,

    /// Miner: method used to score completions
    #[arg(long, value_enum)]
    pub scoring_method: Option<ScoringMethod>,

    /// Miner: accept queries from non registered entities (dangerous)
    #[arg(long)]
    pub allow_non_registered: bool,
}

impl NeuronArgs {
    pub fn into_config(self) -> NeuronConfig {
        let mut config = match self.neuron_type {
            NeuronType::Miner => NeuronConfig::miner(),
            NeuronType::Validator => NeuronConfig::validator(),
        };
        config.netuid = self.netuid;
        config.device = self.device;
        config.epoch_length = self.epoch_length;
        config.logging_dir = self.logging_dir;
        if let Some(name) = self.neuron_name {
            config.name = name;
        }

        if let Some(validator) = config.validator.as_mut() {
            if let Some(size) = self.sample_size {
                validator.sample_size = size;
            }
            if let Some(alpha) = self.moving_average_alpha {
                validator.moving_average_alpha = alpha;
            }
            validator.disable_set_weights = self.disable_set_weights;
            validator.axon_off = self.axon_off;
        }
        if let Some(miner) = config.miner.as_mut() {
            miner.scoring_method = self.scoring_method;
            miner.allow_non_registered = self.allow_non_registered;
        }
        config
    }
}

/// Maximum number of worker results a Dojo task collects (`TASK_MAX_RESULTS`)
pub fn task_max_results() -> u32 {
    match std::env::var("TASK_MAX_RESULTS") {
        Ok(value) if !value.trim().is_empty() => match value.trim().parse() {
            Ok(n) => n,
            Err(_) => {
                warn!("TASK_MAX_RESULTS is not a number ({}), defaulting to 1", value);
                1
            }
        },
        _ => {
            warn!("TASK_MAX_RESULTS is not set, defaulting to 1");
            1
        }
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Replace the home directory prefix with `~`
pub fn hide_sensitive_path(path: &Path) -> String {
    match dirs::home_dir() {
        Some(home) => match path.strip_prefix(&home) {
            Ok(rest) => Path::new("~").join(rest).display().to_string(),
            Err(_) => path.display().to_string(),
        },
        None => path.display().to_string(),
    }
}

// ============================================================================
// WEIGHTS & BIASES
// ============================================================================

/// Description of a W&B run for a neuron
#[derive(Debug, Clone, Serialize)]
pub struct WandbRun {
    pub project: String,
    pub entity: String,
    pub run_name: String,
    pub uid: u16,
    pub hotkey: String,
    pub version: String,
    /// Neuron directory with the home prefix hidden
    pub dir: Option<String>,
}

impl WandbRun {
    pub fn new(
        project: &str,
        config: &NeuronConfig,
        uid: u16,
        hotkey: &str,
        neuron_dir: Option<&Path>,
    ) -> Result<Self> {
        if !WANDB_PROJECTS.contains(&project) {
            return Err(DojoError::Config(format!(
                "Invalid wandb project name: {}",
                project
            )));
        }
        let version = env!("CARGO_PKG_VERSION").to_string();
        Ok(Self {
            project: project.to_string(),
            entity: WANDB_ENTITY.to_string(),
            run_name: format!("{}-{}-{}", config.neuron_type, uid, version),
            uid,
            hotkey: hotkey.to_string(),
            version,
            dir: neuron_dir.map(hide_sensitive_path),
        })
    }
}
