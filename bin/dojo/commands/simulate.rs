//! Simulate command - run a validator round against simulated miners

use crate::style::*;
use anyhow::{Context, Result};
use clap::Args;
use dojo::protocol::{CodeAnswer, CodeFile, Completion, CompletionResponse, CriteriaType, FeedbackRequest, TaskType};
use dojo::simulator::{SimNetwork, ValidatorSim};
use dojo::storage::TaskStore;
use dojo::task_tracker::{TaskTracker, TrackerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of simulated miners
    #[arg(long, default_value = "5")]
    pub miners: usize,

    /// Requests sent by the validator
    #[arg(long, default_value = "1")]
    pub rounds: usize,

    /// Persist to this SQLite file instead of memory
    #[arg(long)]
    pub db: Option<PathBuf>,

    #[arg(long, default_value = "sim-validator")]
    pub validator_hotkey: String,
}

fn sample_request(round: usize) -> FeedbackRequest {
    let mut request = FeedbackRequest::new(
        TaskType::CodeGeneration,
        format!("Render a spinning cube (round {})", round),
    );
    let models = ["model-alpha", "model-beta", "model-gamma"];
    request.criteria_types = vec![CriteriaType::MultiScore {
        options: models.iter().map(|m| m.to_string()).collect(),
        min: 1.0,
        max: 100.0,
    }];
    for (rank, model) in models.iter().enumerate() {
        let completion = CompletionResponse::new(
            *model,
            Completion::Code(CodeAnswer {
                files: vec![CodeFile {
                    filename: "index.html".to_string(),
                    content: format!("<html><body><p>{}</p></body></html>", model),
                    language: Some("html".to_string()),
                }],
            }),
        );
        request
            .ground_truth
            .insert(completion.completion_id.clone(), rank as i64 + 1);
        request.completion_responses.push(completion);
    }
    request
}

pub async fn run(args: SimulateArgs) -> Result<()> {
    print_header("Simulation");

    let store = match &args.db {
        Some(path) => TaskStore::open(path)
            .with_context(|| format!("Failed to open task store {}", path.display()))?,
        None => TaskStore::in_memory()?,
    };
    let network = SimNetwork::with_miners(args.miners);
    let validator = ValidatorSim::new(&args.validator_hotkey, store.clone());

    let mut request_ids = Vec::new();
    for round in 0..args.rounds {
        let query = validator.send_request(&network, sample_request(round)).await?;
        print_info(&format!(
            "Round {}: {} of {} miners answered",
            round + 1,
            query.miner_responses.len(),
            args.miners
        ));
        request_ids.push(query.request.request_id);
    }

    let mut config = TrackerConfig::new(&args.validator_hotkey);
    config.initial_delay = Duration::ZERO;
    let tracker = TaskTracker::new(config, store.clone(), Arc::new(network));
    let stats = tracker.process_once().await?;

    print_section("Results");
    print_key_value("Tasks tracked", &stats.tasks.to_string());
    print_key_value("Responses scored", &stats.completed.to_string());

    for request_id in &request_ids {
        let Some(task) = store.get_task_by_request_id(request_id) else {
            print_warning(&format!("Task {} not found", request_id));
            continue;
        };
        if let Some(first) = task.miner_responses.first() {
            for completion in &first.completion_responses {
                print_key_value(
                    &completion.model,
                    &completion
                        .score
                        .map(|s| format!("{:.1}", s))
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }
    }

    let processed = store.mark_tasks_processed_by_request_ids(&request_ids)?;
    print_success(&format!("Marked {} rows processed", processed));
    Ok(())
}
