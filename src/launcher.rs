//! Service Launcher
//!
//! Operator entry points for running Dojo services. Each target becomes a
//! fixed list of process invocations (`pre-commit`, `git`, `docker compose`).
//! Service targets pick a compose profile from the network and the
//! deployment mode and must pass an env preflight before anything starts.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::envcheck::{self, EnvFile, EnvReport, Profile};
use crate::error::DojoError;

// ============================================================================
// TARGETS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }

    /// W&B project validators on this network log to
    pub fn wandb_project(&self) -> &'static str {
        match self {
            Network::Mainnet => "dojo-mainnet",
            Network::Testnet => "dojo-testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Miner,
    Validator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Centralised,
    Decentralised,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Target {
    Hooks,
    UpdateSubmodules,
    MinerDecentralised,
    MinerCentralised,
    Validator,
}

impl Target {
    pub const ALL: [Target; 5] = [
        Target::Hooks,
        Target::UpdateSubmodules,
        Target::MinerDecentralised,
        Target::MinerCentralised,
        Target::Validator,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Target::Hooks => "hooks",
            Target::UpdateSubmodules => "update-submodules",
            Target::MinerDecentralised => "miner-decentralised",
            Target::MinerCentralised => "miner-centralised",
            Target::Validator => "validator",
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Target::MinerDecentralised | Target::MinerCentralised => Some(Role::Miner),
            Target::Validator => Some(Role::Validator),
            Target::Hooks | Target::UpdateSubmodules => None,
        }
    }

    /// Validators always run against the decentralised stack
    pub fn mode(&self) -> Option<Mode> {
        match self {
            Target::MinerCentralised => Some(Mode::Centralised),
            Target::MinerDecentralised | Target::Validator => Some(Mode::Decentralised),
            Target::Hooks | Target::UpdateSubmodules => None,
        }
    }

    /// Env profile of a service target, `None` for repository chores
    pub fn profile(&self) -> Option<Profile> {
        match self {
            Target::MinerDecentralised => Some(Profile::MinerDecentralised),
            Target::MinerCentralised => Some(Profile::MinerCentralised),
            Target::Validator => Some(Profile::Validator),
            Target::Hooks | Target::UpdateSubmodules => None,
        }
    }

    pub fn compose_file(&self) -> Option<&'static str> {
        self.role().map(|role| match role {
            Role::Miner => "docker-compose.miner.yaml",
            Role::Validator => "docker-compose.validator.yaml",
        })
    }

    pub fn usage(&self) -> String {
        format!(
            "Please specify a valid network: dojo {} --network <mainnet|testnet>",
            self.name()
        )
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::ALL
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| format!("unknown target '{}'", s))
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

/// One process invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl CommandLine {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            envs: Vec::new(),
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn is_compose(&self) -> bool {
        self.program == "docker" && self.args.first().map(String::as_str) == Some("compose")
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.envs {
            write!(f, "{}={} ", k, v)?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Ordered invocations for one target
#[derive(Debug, Clone, Serialize)]
pub struct LaunchPlan {
    pub target: Target,
    pub network: Option<Network>,
    pub profile: Option<String>,
    pub commands: Vec<CommandLine>,
}

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("{0}")]
    Usage(String),

    #[error("{}", .0.summary())]
    EnvIncomplete(Box<EnvReport>),

    #[error("Missing file: {0}")]
    MissingFile(PathBuf),

    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}", .code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    CommandFailed { command: String, code: Option<i32> },

    #[error(transparent)]
    Env(#[from] DojoError),
}

impl LaunchError {
    /// Process exit code the CLI reports for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::Usage(_) => 2,
            LaunchError::CommandFailed { code: Some(c), .. } => *c,
            _ => 1,
        }
    }
}

/// Build the invocations for `target`. Service targets need a network.
pub fn plan(target: Target, network: Option<&str>) -> Result<LaunchPlan, LaunchError> {
    match target {
        Target::Hooks => Ok(LaunchPlan {
            target,
            network: None,
            profile: None,
            commands: vec![CommandLine::new("pre-commit", &["install"])],
        }),
        Target::UpdateSubmodules => Ok(LaunchPlan {
            target,
            network: None,
            profile: None,
            commands: vec![CommandLine::new(
                "git",
                &["submodule", "update", "--init", "--recursive"],
            )],
        }),
        Target::MinerDecentralised | Target::MinerCentralised | Target::Validator => {
            let network = network
                .and_then(|n| n.trim().parse::<Network>().ok())
                .ok_or_else(|| LaunchError::Usage(target.usage()))?;

            let (compose_file, env_file) = match (target.compose_file(), target.profile()) {
                (Some(c), Some(p)) => (c, p.env_file()),
                _ => return Err(LaunchError::Usage(target.usage())),
            };
            let profile = format!("{}-{}", target.name(), network);

            let compose = CommandLine::new(
                "docker",
                &[
                    "compose",
                    "-f",
                    compose_file,
                    "--env-file",
                    env_file,
                    "--profile",
                    &profile,
                    "up",
                    "--build",
                    "-d",
                ],
            )
            .env("DOJO_NETWORK", network.as_str());

            Ok(LaunchPlan {
                target,
                network: Some(network),
                profile: Some(profile),
                commands: vec![compose],
            })
        }
    }
}

// ============================================================================
// RUNNERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Executes command lines
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &CommandLine, cwd: &Path) -> std::io::Result<ExitOutcome>;
}

/// Runs commands as child processes, inheriting stdio
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &CommandLine, cwd: &Path) -> std::io::Result<ExitOutcome> {
        let status = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(cwd)
            .status()
            .await?;
        Ok(ExitOutcome {
            code: status.code(),
        })
    }
}

/// Plans and runs targets from a repository checkout
pub struct Launcher {
    root: PathBuf,
    runner: Arc<dyn CommandRunner>,
    preflight: bool,
}

impl Launcher {
    pub fn new(root: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            root: root.into(),
            runner,
            preflight: true,
        }
    }

    /// Skip the env file check before service targets
    pub fn without_preflight(mut self) -> Self {
        self.preflight = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Env check a service target would run, without starting anything
    pub fn preflight(&self, plan: &LaunchPlan) -> Result<Option<EnvReport>, LaunchError> {
        let Some(profile) = plan.target.profile() else {
            return Ok(None);
        };

        if let Some(compose_file) = plan.target.compose_file() {
            let path = self.root.join(compose_file);
            if !path.exists() {
                return Err(LaunchError::MissingFile(path));
            }
        }

        let env_path = self.root.join(profile.env_file());
        if !env_path.exists() {
            return Err(LaunchError::MissingFile(env_path));
        }
        let env = EnvFile::load(&env_path)?;
        Ok(Some(envcheck::check(profile, &env, plan.network)))
    }

    pub async fn run(&self, target: Target, network: Option<&str>) -> Result<LaunchPlan, LaunchError> {
        let plan = plan(target, network)?;

        if self.preflight {
            if let Some(report) = self.preflight(&plan)? {
                if !report.is_ok() {
                    warn!("{}", report.summary());
                    return Err(LaunchError::EnvIncomplete(Box::new(report)));
                }
            }
        }

        for command in &plan.commands {
            info!("Running: {}", command);
            let outcome = self
                .runner
                .run(command, &self.root)
                .await
                .map_err(|source| LaunchError::Spawn {
                    command: command.to_string(),
                    source,
                })?;
            if !outcome.success() {
                return Err(LaunchError::CommandFailed {
                    command: command.to_string(),
                    code: outcome.code,
                });
            }
        }

        info!("{} done", target);
        Ok(plan)
    }
}
