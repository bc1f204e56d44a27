//! Dojo operator CLI
//!
//! Launches miners and validators and runs the validator-side tooling.

mod commands;
mod style;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dojo::launcher::{LaunchError, Target};
use std::path::PathBuf;
use std::process::ExitCode;

use commands::env::ProfileArg;
use style::print_error;

#[derive(Parser, Debug)]
#[command(name = "dojo")]
#[command(about = "Dojo subnet operator toolkit", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install the pre-commit hooks
    Hooks(commands::launch::LaunchArgs),

    /// Update git submodules
    UpdateSubmodules(commands::launch::LaunchArgs),

    /// Start a decentralised miner with docker compose
    MinerDecentralised(commands::launch::LaunchArgs),

    /// Start a centralised miner with docker compose
    MinerCentralised(commands::launch::LaunchArgs),

    /// Start a validator with docker compose
    Validator(commands::launch::LaunchArgs),

    /// Check or create environment files
    Env {
        #[command(subcommand)]
        command: EnvCommand,
    },

    /// Show the resolved neuron configuration
    Config(commands::config::ConfigArgs),

    /// Obfuscate an HTML file
    Obfuscate {
        input: PathBuf,

        /// Defaults to `<name>_obfuscated.<ext>` in the current directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Create a synthetic code-generation task on the worker API
    Synthetic(commands::synthetic::SyntheticArgs),

    /// Serve the external task gateway
    Gateway(commands::gateway::GatewayArgs),

    /// Collect worker results for stored tasks
    Track(commands::track::TrackArgs),

    /// Run simulated miners against a local validator
    Simulate(commands::simulate::SimulateArgs),
}

#[derive(Subcommand, Debug)]
enum EnvCommand {
    /// Validate an env file against a profile
    Check {
        #[arg(value_enum)]
        profile: ProfileArg,

        /// Defaults to the profile's env file in the working directory
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Also check values that depend on the network
        #[arg(long)]
        network: Option<String>,
    },

    /// Write an env file template
    Init {
        #[arg(value_enum)]
        profile: ProfileArg,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Prompt for required values
        #[arg(short, long)]
        interactive: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dojo=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialise logging: {}", e);
    }

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&format!("{:#}", e));
            let code = e
                .downcast_ref::<LaunchError>()
                .map(LaunchError::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Hooks(args) => commands::launch::run(Target::Hooks, args).await,
        Commands::UpdateSubmodules(args) => {
            commands::launch::run(Target::UpdateSubmodules, args).await
        }
        Commands::MinerDecentralised(args) => {
            commands::launch::run(Target::MinerDecentralised, args).await
        }
        Commands::MinerCentralised(args) => {
            commands::launch::run(Target::MinerCentralised, args).await
        }
        Commands::Validator(args) => commands::launch::run(Target::Validator, args).await,
        Commands::Env { command } => match command {
            EnvCommand::Check {
                profile,
                file,
                network,
            } => commands::env::check(profile.into(), file, network.as_deref()),
            EnvCommand::Init {
                profile,
                output,
                interactive,
                force,
            } => commands::env::init(profile.into(), output, interactive, force),
        },
        Commands::Config(args) => commands::config::run(args),
        Commands::Obfuscate { input, output } => commands::obfuscate::run(input, output).await,
        Commands::Synthetic(args) => commands::synthetic::run(args).await,
        Commands::Gateway(args) => commands::gateway::run(args).await,
        Commands::Track(args) => commands::track::run(args).await,
        Commands::Simulate(args) => commands::simulate::run(args).await,
    }
}
