//! Dojo subnet operator toolkit
//!
//! Launches miners and validators through docker compose, checks their
//! environment files, and implements the validator-side task plumbing that
//! runs outside the Bittensor transport.
//!
//! ## Module Structure
//!
//! - `launcher`: operator targets (`hooks`, `miner-*`, `validator`) and their commands
//! - `envcheck`: `.env` catalog, validation and templates
//! - `config`: neuron configuration
//! - `protocol`: feedback requests, completions and task results
//! - `hotkey`: SS58 hotkey handling
//! - `storage`: SQLite task store
//! - `dojo_api`: worker API client
//! - `task_tracker`: periodic collection of worker results
//! - `obfuscation`: HTML/JS obfuscation of code completions
//! - `synthetic`: synthetic code-generation tasks
//! - `simulator`: local miner/validator simulation
//! - `gateway`: HTTP intake for external tasks

pub mod config;
pub mod dojo_api;
pub mod envcheck;
pub mod error;
pub mod gateway;
pub mod hotkey;
pub mod launcher;
pub mod obfuscation;
pub mod protocol;
pub mod simulator;
pub mod storage;
pub mod synthetic;
pub mod task_tracker;

pub use config::{NeuronArgs, NeuronConfig, NeuronType, ScoringMethod};
pub use dojo_api::{DojoApi, RetryPolicy};
pub use envcheck::{EnvFile, EnvReport, Profile};
pub use error::{DojoError, Result};
pub use gateway::{StorageSubmitter, TaskSubmitter};
pub use launcher::{
    CommandLine, CommandRunner, LaunchError, LaunchPlan, Launcher, Mode, Network, ProcessRunner, Role,
    Target,
};
pub use obfuscation::HtmlObfuscator;
pub use protocol::{
    CompletionResponse, CriteriaType, DendriteQueryResponse, FeedbackRequest, TaskResult,
    TaskResultRequest, TaskType,
};
pub use simulator::{MinerSim, SimNetwork, TtlStore, ValidatorSim};
pub use storage::TaskStore;
pub use synthetic::SyntheticApi;
pub use task_tracker::{TaskResultSource, TaskTracker, TrackerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
