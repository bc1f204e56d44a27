//! Task Completion Tracker
//!
//! Periodically walks the validator's unexpired tasks, asks each miner for
//! the worker results of its Dojo task, averages them per model and writes
//! the averages back into the stored miner completions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dojo_api::DojoApi;
use crate::error::{DojoError, Result};
use crate::hotkey::short_hotkey;
use crate::protocol::{CriteriaKind, FeedbackRequest, TaskResult};
use crate::storage::TaskStore;

/// Source of worker results for a miner's Dojo task
#[async_trait]
pub trait TaskResultSource: Send + Sync {
    async fn get_task_results(&self, miner_hotkey: &str, task_id: &str) -> Result<Vec<TaskResult>>;
}

/// Read results straight from the worker API, ignoring the miner
#[async_trait]
impl TaskResultSource for DojoApi {
    async fn get_task_results(&self, _miner_hotkey: &str, task_id: &str) -> Result<Vec<TaskResult>> {
        Ok(self
            .get_task_results_by_task_id(task_id)
            .await
            .unwrap_or_default())
    }
}

/// Per-model average rank and average score over all worker results.
/// Obfuscated model ids are translated when a mapping exists.
pub fn calculate_averages(
    task_results: &[TaskResult],
    obfuscated_to_real: &HashMap<String, String>,
) -> (HashMap<String, f64>, HashMap<String, f64>) {
    let mut ranks: HashMap<String, f64> = HashMap::new();
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut num_ranks = 0u32;
    let mut num_scores = 0u32;

    for result in task_results {
        for data in &result.result_data {
            let (target, count) = match data.kind {
                CriteriaKind::RankingCriteria => (&mut ranks, &mut num_ranks),
                CriteriaKind::MultiScore => (&mut scores, &mut num_scores),
                _ => continue,
            };
            for (model_id, value) in &data.value {
                let real = obfuscated_to_real.get(model_id).unwrap_or(model_id);
                *target.entry(real.clone()).or_insert(0.0) += value;
            }
            *count += 1;
        }
    }

    for rank in ranks.values_mut() {
        *rank /= f64::from(num_ranks);
    }
    for score in scores.values_mut() {
        *score /= f64::from(num_scores);
    }
    (ranks, scores)
}

// ============================================================================
// TRACKER
// ============================================================================

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub validator_hotkeys: Vec<String>,
    /// Wait before the first pass
    pub initial_delay: Duration,
    pub interval: Duration,
    pub batch_size: usize,
}

impl TrackerConfig {
    pub fn new(validator_hotkey: impl Into<String>) -> Self {
        Self {
            validator_hotkeys: vec![validator_hotkey.into()],
            initial_delay: Duration::from_secs(60),
            interval: Duration::from_secs(30),
            batch_size: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub batches: usize,
    pub tasks: usize,
    /// Miner responses with worker results
    pub completed: usize,
    /// Miner responses without results yet
    pub pending: usize,
    pub invalid: usize,
    pub updated: usize,
    pub update_failures: usize,
}

pub struct TaskTracker {
    config: TrackerConfig,
    store: TaskStore,
    source: Arc<dyn TaskResultSource>,
}

/// Handle returned by `TaskTracker::spawn` for graceful shutdown
pub struct TrackerHandle {
    pub task_handle: tokio::task::JoinHandle<()>,
    pub shutdown_tx: watch::Sender<bool>,
}

impl TrackerHandle {
    /// Signal the tracker to stop after the current pass
    pub fn shutdown(&self) {
        if let Err(e) = self.shutdown_tx.send(true) {
            warn!("Failed to send shutdown signal to task tracker: {}", e);
        }
    }
}

impl TaskTracker {
    pub fn new(config: TrackerConfig, store: TaskStore, source: Arc<dyn TaskResultSource>) -> Self {
        Self {
            config,
            store,
            source,
        }
    }

    async fn fetch_results(&self, miner_hotkey: &str, task_id: &str) -> Vec<TaskResult> {
        info!(
            "Fetching task result from miner {} for task {}",
            short_hotkey(miner_hotkey),
            task_id
        );
        match self.source.get_task_results(miner_hotkey, task_id).await {
            Ok(results) => results,
            Err(e) => {
                error!(
                    "Error fetching task result from miner {}: {}",
                    short_hotkey(miner_hotkey),
                    e
                );
                Vec::new()
            }
        }
    }

    /// Apply averaged worker results to one miner response. Returns false
    /// when there are no results yet.
    async fn track_response(
        &self,
        response: &mut FeedbackRequest,
        obfuscated_to_real: &HashMap<String, String>,
    ) -> Result<bool> {
        let (miner_hotkey, task_id) = match (response.miner_hotkey(), response.dojo_task_id.as_deref()) {
            (Some(hotkey), Some(task_id)) if !task_id.is_empty() => {
                (hotkey.to_string(), task_id.to_string())
            }
            _ => {
                return Err(DojoError::InvalidMinerResponse(format!(
                    "Missing hotkey, task_id, or axon: axon: {:?}, task_id: {:?}",
                    response.axon, response.dojo_task_id
                )))
            }
        };

        let results = self.fetch_results(&miner_hotkey, &task_id).await;
        if results.is_empty() {
            debug!(
                "Task ID: {} by miner: {} has not been completed yet or no task results.",
                task_id,
                short_hotkey(&miner_hotkey)
            );
            return Ok(false);
        }

        let (avg_ranks, avg_scores) = calculate_averages(&results, obfuscated_to_real);
        for completion in &mut response.completion_responses {
            if let Some(rank) = avg_ranks.get(&completion.model) {
                completion.rank_id = Some(rank.trunc() as i64);
            }
            if let Some(score) = avg_scores.get(&completion.model) {
                completion.score = Some(*score);
            }
        }
        Ok(true)
    }

    /// One pass over every unexpired task
    pub async fn process_once(&self) -> Result<TrackerStats> {
        let mut stats = TrackerStats::default();

        let batches = match self
            .store
            .unexpired_task_batches(&self.config.validator_hotkeys, self.config.batch_size)
        {
            Ok(batches) => batches,
            Err(e) if e.is_idle() => {
                info!("{}", e);
                return Ok(stats);
            }
            Err(e) => return Err(e),
        };

        for batch in batches {
            let batch = batch?;
            info!("Monitoring task completions, batch id: {}", stats.batches);
            stats.batches += 1;

            for task in batch {
                stats.tasks += 1;
                let request_id = task.request.request_id.clone();
                let obfuscated_to_real = self.store.get_real_model_ids(&request_id)?;

                let mut updated = Vec::new();
                for mut response in task.miner_responses {
                    match self.track_response(&mut response, &obfuscated_to_real).await {
                        Ok(true) => {
                            stats.completed += 1;
                            updated.push(response);
                        }
                        Ok(false) => stats.pending += 1,
                        Err(e) => {
                            error!("Request {}: {}", request_id, e);
                            stats.invalid += 1;
                        }
                    }
                }

                if updated.is_empty() {
                    continue;
                }
                let success = self
                    .store
                    .update_miner_completions_by_request_id(&request_id, &updated);
                info!(
                    "Updating task {} with miner's completion data, success ? {}",
                    request_id, success
                );
                if success {
                    stats.updated += updated.len();
                } else {
                    stats.update_failures += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Run until `shutdown_rx` turns true
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            "Starting task tracker (initial delay: {}s, interval: {}s)",
            self.config.initial_delay.as_secs(),
            self.config.interval.as_secs()
        );

        tokio::select! {
            _ = tokio::time::sleep(self.config.initial_delay) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
            }
        }

        loop {
            match self.process_once().await {
                Ok(stats) => debug!("Task tracker pass: {:?}", stats),
                Err(e) => error!("Error during Dojo task monitoring: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Task tracker received shutdown signal, stopping gracefully");
                        break;
                    }
                }
            }
        }
    }

    pub fn spawn(self) -> TrackerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task_handle = tokio::spawn(self.run(shutdown_rx));
        TrackerHandle {
            task_handle,
            shutdown_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        set_expire_time, CodeAnswer, Completion, CompletionResponse, DendriteQueryResponse,
        ResultData, TaskType, TerminalInfo,
    };
    use parking_lot::Mutex;

    fn result(kind: CriteriaKind, value: &[(&str, f64)]) -> TaskResult {
        TaskResult {
            id: "r".to_string(),
            status: "COMPLETED".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
            result_data: vec![ResultData {
                kind,
                value: value.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            }],
            worker_id: "w".to_string(),
            task_id: "t".to_string(),
        }
    }

    #[derive(Default)]
    struct FakeSource {
        results: HashMap<String, Vec<TaskResult>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl TaskResultSource for FakeSource {
        async fn get_task_results(&self, miner_hotkey: &str, task_id: &str) -> Result<Vec<TaskResult>> {
            self.calls
                .lock()
                .push((miner_hotkey.to_string(), task_id.to_string()));
            if task_id == "broken" {
                return Err(DojoError::Timeout);
            }
            Ok(self.results.get(task_id).cloned().unwrap_or_default())
        }
    }

    fn seed(store: &TaskStore, miners: &[(&str, &str)]) -> FeedbackRequest {
        let mut request = FeedbackRequest::new(TaskType::CodeGeneration, "draw");
        request.dendrite = Some(TerminalInfo::with_hotkey("5Vali"));
        request.expire_at = Some(set_expire_time(3600));
        let mut a = CompletionResponse::new("model-a", Completion::Code(CodeAnswer { files: vec![] }));
        a.completion_id = "obf-a".to_string();
        let mut b = CompletionResponse::new("model-b", Completion::Code(CodeAnswer { files: vec![] }));
        b.completion_id = "obf-b".to_string();
        request.ground_truth.insert("obf-a".to_string(), 1);
        request.ground_truth.insert("obf-b".to_string(), 2);
        request.completion_responses = vec![a, b];

        let miner_responses = miners
            .iter()
            .map(|(hotkey, task_id)| {
                let mut response = request.clone();
                response.dendrite = None;
                response.axon = Some(TerminalInfo::with_hotkey(*hotkey));
                response.dojo_task_id = Some(task_id.to_string());
                response
            })
            .collect();
        store
            .save_dendrite_response(&DendriteQueryResponse {
                request: request.clone(),
                miner_responses,
            })
            .unwrap();
        request
    }

    #[test]
    fn test_calculate_averages_translates_ids() {
        let mapping: HashMap<String, String> =
            [("obf-a".to_string(), "model-a".to_string())].into_iter().collect();
        let results = vec![
            result(CriteriaKind::RankingCriteria, &[("obf-a", 1.0), ("model-b", 2.0)]),
            result(CriteriaKind::RankingCriteria, &[("obf-a", 2.0), ("model-b", 1.0)]),
            result(CriteriaKind::MultiScore, &[("obf-a", 90.0)]),
            result(CriteriaKind::MultiSelect, &[("obf-a", 1.0)]),
        ];

        let (ranks, scores) = calculate_averages(&results, &mapping);
        assert_eq!(ranks["model-a"], 1.5);
        assert_eq!(ranks["model-b"], 1.5);
        assert_eq!(scores["model-a"], 90.0);
        assert_eq!(scores.len(), 1);
    }

    #[test]
    fn test_calculate_averages_empty() {
        let (ranks, scores) = calculate_averages(&[], &HashMap::new());
        assert!(ranks.is_empty());
        assert!(scores.is_empty());
    }

    #[tokio::test]
    async fn test_process_once_updates_completions() {
        let store = TaskStore::in_memory().unwrap();
        let request = seed(&store, &[("5MinerA", "task-a"), ("5MinerB", "task-b")]);

        let mut source = FakeSource::default();
        source.results.insert(
            "task-a".to_string(),
            vec![
                result(CriteriaKind::MultiScore, &[("obf-a", 80.0), ("obf-b", 40.0)]),
                result(CriteriaKind::MultiScore, &[("obf-a", 60.0), ("obf-b", 20.0)]),
                result(CriteriaKind::RankingCriteria, &[("obf-a", 1.7), ("obf-b", 2.2)]),
            ],
        );
        let tracker = TaskTracker::new(TrackerConfig::new("5Vali"), store.clone(), Arc::new(source));

        let stats = tracker.process_once().await.unwrap();
        assert_eq!(stats.tasks, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.updated, 1);

        let task = store.get_task_by_request_id(&request.request_id).unwrap();
        let miner_a = task
            .miner_responses
            .iter()
            .find(|m| m.miner_hotkey() == Some("5MinerA"))
            .unwrap();
        let a = miner_a
            .completion_responses
            .iter()
            .find(|c| c.model == "model-a")
            .unwrap();
        assert_eq!(a.score, Some(70.0));
        assert_eq!(a.rank_id, Some(1));
        let b = miner_a
            .completion_responses
            .iter()
            .find(|c| c.model == "model-b")
            .unwrap();
        assert_eq!(b.score, Some(30.0));
        assert_eq!(b.rank_id, Some(2));

        let miner_b = task
            .miner_responses
            .iter()
            .find(|m| m.miner_hotkey() == Some("5MinerB"))
            .unwrap();
        assert!(miner_b.completion_responses.iter().all(|c| c.score.is_none()));
    }

    #[tokio::test]
    async fn test_process_once_idle_store() {
        let store = TaskStore::in_memory().unwrap();
        let tracker = TaskTracker::new(
            TrackerConfig::new("5Vali"),
            store,
            Arc::new(FakeSource::default()),
        );
        assert_eq!(tracker.process_once().await.unwrap(), TrackerStats::default());
    }

    #[tokio::test]
    async fn test_source_errors_count_as_pending() {
        let store = TaskStore::in_memory().unwrap();
        seed(&store, &[("5MinerA", "broken")]);
        let tracker = TaskTracker::new(
            TrackerConfig::new("5Vali"),
            store,
            Arc::new(FakeSource::default()),
        );
        let stats = tracker.process_once().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.updated, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_tracker_polls_until_shutdown() {
        let store = TaskStore::in_memory().unwrap();
        seed(&store, &[("5MinerA", "task-a")]);
        let source = Arc::new(FakeSource::default());

        let mut config = TrackerConfig::new("5Vali");
        config.initial_delay = Duration::from_secs(5);
        let handle = TaskTracker::new(config, store, source.clone()).spawn();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(source.calls.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(70)).await;
        let polls = source.calls.lock().len();
        assert!(polls >= 2, "expected repeated polling, got {}", polls);

        handle.shutdown();
        handle.task_handle.await.unwrap();
    }
}
