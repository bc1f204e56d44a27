//! Config command - show the resolved neuron configuration

use crate::style::*;
use anyhow::Result;
use clap::Args;
use dojo::config::{hide_sensitive_path, task_max_results, NeuronArgs, WandbRun};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub neuron: NeuronArgs,

    #[arg(long, default_value = "default", env = "WALLET_COLDKEY")]
    pub wallet_name: String,

    #[arg(long, default_value = "default", env = "WALLET_HOTKEY")]
    pub wallet_hotkey: String,

    /// Describe the W&B run for this project as well
    #[arg(long, env = "WANDB_PROJECT_NAME")]
    pub wandb_project: Option<String>,

    /// Neuron uid used in the W&B run name
    #[arg(long, default_value = "0")]
    pub uid: u16,

    /// Create the neuron directory
    #[arg(long)]
    pub create_dir: bool,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: ConfigArgs) -> Result<()> {
    let config = args.neuron.into_config();
    let full_path = if args.create_dir {
        config.ensure_full_path(&args.wallet_name, &args.wallet_hotkey)?
    } else {
        config.full_path(&args.wallet_name, &args.wallet_hotkey)
    };
    let wandb = args
        .wandb_project
        .as_deref()
        .map(|project| WandbRun::new(project, &config, args.uid, &args.wallet_hotkey, Some(full_path.as_path())))
        .transpose()?;

    if args.json {
        let out = serde_json::json!({
            "config": config,
            "full_path": full_path,
            "task_max_results": task_max_results(),
            "wandb": wandb,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    print_header("Neuron configuration");
    print_key_value("Type", &config.neuron_type.to_string());
    print_key_value("Name", &config.name);
    print_key_value("Netuid", &config.netuid.to_string());
    print_key_value("Device", &config.device);
    print_key_value("Epoch length", &format!("{} blocks", config.epoch_length));
    print_key_value("Events retention", &config.events_retention_size);
    print_key_value("Directory", &hide_sensitive_path(&full_path));
    print_key_value("Task max results", &task_max_results().to_string());

    if let Some(validator) = &config.validator {
        print_section("Validator");
        print_key_value("Sample size", &validator.sample_size.to_string());
        print_key_value("Concurrent forwards", &validator.num_concurrent_forwards.to_string());
        print_key_value("Moving average alpha", &validator.moving_average_alpha.to_string());
        print_key_value("Set weights", if validator.disable_set_weights { "disabled" } else { "enabled" });
        print_key_value("Axon", if validator.axon_off { "off" } else { "on" });
        print_key_value("Vpermit TAO limit", &validator.vpermit_tao_limit.to_string());
        print_key_value("Dendrite timeout", &format!("{}s", validator.dendrite_timeout_secs));
    }
    if let Some(miner) = &config.miner {
        print_section("Miner");
        print_key_value(
            "Scoring method",
            &miner
                .scoring_method
                .map(|m| format!("{:?}", m))
                .unwrap_or_else(|| "-".to_string()),
        );
        print_key_value("Force validator permit", &miner.force_validator_permit.to_string());
        if miner.allow_non_registered {
            print_key_value_colored("Allow non registered", "true", crate::style::colors::YELLOW);
        } else {
            print_key_value("Allow non registered", "false");
        }
    }
    if let Some(run) = &wandb {
        print_section("Weights & Biases");
        print_key_value("Project", &run.project);
        print_key_value("Entity", &run.entity);
        print_key_value("Run", &run.run_name);
    }
    println!();
    Ok(())
}
