//! Launch command - run a target (hooks, submodules, miners, validator)

use crate::commands::env::print_report;
use crate::style::*;
use anyhow::Result;
use clap::Args;
use dojo::launcher::{plan, LaunchError, Launcher, ProcessRunner, Target};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// mainnet or testnet (service targets only)
    #[arg(long, env = "DOJO_NETWORK")]
    pub network: Option<String>,

    /// Repository checkout holding the compose and env files
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Start services without validating the env file first
    #[arg(long)]
    pub skip_env_check: bool,

    /// Print the commands without running them
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn run(target: Target, args: LaunchArgs) -> Result<()> {
    print_header(&format!("dojo {}", target));

    let mut launcher = Launcher::new(&args.root, Arc::new(ProcessRunner));
    if args.skip_env_check {
        launcher = launcher.without_preflight();
    }

    if args.dry_run {
        return dry_run(&launcher, target, args.network.as_deref(), args.skip_env_check);
    }

    match launcher.run(target, args.network.as_deref()).await {
        Ok(plan) => {
            if let Some(profile) = &plan.profile {
                print_success(&format!("{} started (profile {})", target, profile));
            } else {
                print_success(&format!("{} done", target));
            }
            Ok(())
        }
        Err(LaunchError::EnvIncomplete(report)) => {
            print_report(&report);
            Err(LaunchError::EnvIncomplete(report).into())
        }
        Err(e) => Err(e.into()),
    }
}

fn dry_run(
    launcher: &Launcher,
    target: Target,
    network: Option<&str>,
    skip_env_check: bool,
) -> Result<()> {
    let plan = plan(target, network)?;

    if let (Some(role), Some(mode)) = (target.role(), target.mode()) {
        print_key_value("Role", &format!("{:?}", role).to_lowercase());
        print_key_value("Mode", &format!("{:?}", mode).to_lowercase());
    }

    print_section("Commands");
    for command in &plan.commands {
        print_command(&command.to_string());
    }

    if !skip_env_check {
        match launcher.preflight(&plan) {
            Ok(Some(report)) => print_report(&report),
            Ok(None) => {}
            Err(e) => print_warning(&format!("Preflight would fail: {}", e)),
        }
    }
    Ok(())
}
