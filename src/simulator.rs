//! Local miner/validator simulation
//!
//! Simulated miners answer feedback requests immediately and report the
//! request's own ground truth as the worker result, so the whole validator
//! flow (send, store, track) can run without a network or human workers.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{DojoError, Result};
use crate::hotkey::short_hotkey;
use crate::protocol::{
    new_uuid, set_expire_time, DendriteQueryResponse, FeedbackRequest, ResultData, TaskResult,
    TaskResultRequest, TerminalInfo,
};
use crate::storage::TaskStore;
use crate::task_tracker::TaskResultSource;

/// How long a miner keeps a request around for result queries
pub const FEEDBACK_TTL: Duration = Duration::from_secs(10 * 3600);

/// Miners queried concurrently per batch
pub const SEND_BATCH_SIZE: usize = 10;

// ============================================================================
// TTL STORE
// ============================================================================

/// In-memory key/value store with per-key expiry
#[derive(Debug, Default, Clone)]
pub struct TtlStore {
    entries: Arc<DashMap<String, (String, Instant)>>,
}

impl TtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.1 > Instant::now() => return Some(entry.0.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires)| *expires > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn feedback_key(request_id: &str) -> String {
    format!("feedback:{}", request_id)
}

// ============================================================================
// MINER
// ============================================================================

pub struct MinerSim {
    hotkey: String,
    store: TtlStore,
    hotkey_to_request: DashMap<String, FeedbackRequest>,
}

impl MinerSim {
    pub fn new(hotkey: impl Into<String>, store: TtlStore) -> Self {
        let hotkey = hotkey.into();
        info!("Starting Miner Simulator {}", short_hotkey(&hotkey));
        Self {
            hotkey,
            store,
            hotkey_to_request: DashMap::new(),
        }
    }

    pub fn hotkey(&self) -> &str {
        &self.hotkey
    }

    /// Accept a validator request. Invalid requests come back unchanged.
    pub fn forward_feedback_request(&self, mut request: FeedbackRequest) -> FeedbackRequest {
        let Some(validator) = request.validator_hotkey().map(str::to_string) else {
            error!("Invalid request: dendrite or dendrite.hotkey is None.");
            return request;
        };
        if request.completion_responses.is_empty() {
            error!("Invalid request: completion_responses is empty.");
            return request;
        }

        let mut stored = request.clone();
        stored.completion_responses.clear();
        match serde_json::to_string(&stored) {
            Ok(json) => self
                .store
                .set(&feedback_key(&request.request_id), json, FEEDBACK_TTL),
            Err(e) => {
                error!("Error handling FeedbackRequest: {}", e);
                return request;
            }
        }
        info!("Stored feedback request {}", request.request_id);

        request.dojo_task_id = Some(request.request_id.clone());
        request.axon = Some(TerminalInfo::with_hotkey(&self.hotkey));
        self.hotkey_to_request.insert(validator, request.clone());

        request.ground_truth.clear();
        request
    }

    /// Answer a result query with one completed result valued by the stored
    /// ground truth. The stored request is consumed.
    pub fn forward_task_result_request(&self, mut request: TaskResultRequest) -> TaskResultRequest {
        info!("Received TaskResultRequest for task id: {}", request.task_id);
        if request.task_id.is_empty() {
            error!("Invalid TaskResultRequest: missing task_id");
            return request;
        }

        let key = feedback_key(&request.task_id);
        let Some(raw) = self.store.get(&key) else {
            debug!("No task result found for task id: {}", request.task_id);
            return request;
        };
        let feedback: FeedbackRequest = match serde_json::from_str(&raw) {
            Ok(feedback) => feedback,
            Err(e) => {
                error!("Error handling TaskResultRequest: {}", e);
                return request;
            }
        };
        let Some(criteria) = feedback.criteria_types.first() else {
            warn!("Task {} has no criteria, nothing to report", request.task_id);
            return request;
        };

        let now = crate::protocol::datetime_to_iso8601(chrono::Utc::now());
        request.task_results = vec![TaskResult {
            id: new_uuid(),
            status: "COMPLETED".to_string(),
            created_at: now.clone(),
            updated_at: now,
            result_data: vec![ResultData {
                kind: criteria.kind(),
                value: feedback
                    .ground_truth
                    .iter()
                    .map(|(id, rank)| (id.clone(), *rank as f64))
                    .collect(),
            }],
            worker_id: new_uuid(),
            task_id: request.task_id.clone(),
        }];

        self.store.delete(&key);
        debug!("Processed task result for task {}", request.task_id);
        request
    }

    /// Last request seen from a validator
    pub fn last_request_from(&self, validator_hotkey: &str) -> Option<FeedbackRequest> {
        self.hotkey_to_request
            .get(validator_hotkey)
            .map(|r| r.value().clone())
    }
}

#[async_trait]
impl TaskResultSource for MinerSim {
    async fn get_task_results(&self, miner_hotkey: &str, task_id: &str) -> Result<Vec<TaskResult>> {
        if miner_hotkey != self.hotkey {
            return Err(DojoError::InvalidMinerResponse(format!(
                "Miner {} is not simulated here",
                short_hotkey(miner_hotkey)
            )));
        }
        Ok(self
            .forward_task_result_request(TaskResultRequest::new(task_id))
            .task_results)
    }
}

/// Simulated miners addressed by hotkey
#[derive(Clone, Default)]
pub struct SimNetwork {
    miners: Vec<Arc<MinerSim>>,
}

impl SimNetwork {
    /// `count` miners, each with its own store
    pub fn with_miners(count: usize) -> Self {
        let miners = (0..count)
            .map(|i| Arc::new(MinerSim::new(format!("sim-miner-{}", i), TtlStore::new())))
            .collect();
        Self { miners }
    }

    pub fn miners(&self) -> &[Arc<MinerSim>] {
        &self.miners
    }

    fn miner(&self, hotkey: &str) -> Option<&Arc<MinerSim>> {
        self.miners.iter().find(|m| m.hotkey() == hotkey)
    }
}

#[async_trait]
impl TaskResultSource for SimNetwork {
    async fn get_task_results(&self, miner_hotkey: &str, task_id: &str) -> Result<Vec<TaskResult>> {
        match self.miner(miner_hotkey) {
            Some(miner) => miner.get_task_results(miner_hotkey, task_id).await,
            None => Err(DojoError::InvalidMinerResponse(format!(
                "Miner Axon not found for hotkey: {}",
                short_hotkey(miner_hotkey)
            ))),
        }
    }
}

// ============================================================================
// VALIDATOR
// ============================================================================

/// Send the same request to every axon, `batch_size` at a time. Requests in
/// a batch run concurrently; responses keep the axon order.
pub async fn send_in_batches<A, T, F, Fut>(
    axons: &[A],
    request: &FeedbackRequest,
    batch_size: usize,
    send: F,
) -> Vec<T>
where
    F: Fn(&A, FeedbackRequest) -> Fut,
    Fut: Future<Output = T>,
{
    let batch_size = batch_size.max(1);
    let num_batches = axons.len().div_ceil(batch_size);
    let mut all_responses = Vec::with_capacity(axons.len());

    for (i, batch) in axons.chunks(batch_size).enumerate() {
        let responses = join_all(batch.iter().map(|axon| send(axon, request.clone()))).await;
        all_responses.extend(responses);
        info!("Processed batch {} of {}", i + 1, num_batches);
    }

    all_responses
}

pub struct ValidatorSim {
    hotkey: String,
    store: TaskStore,
}

impl ValidatorSim {
    pub fn new(hotkey: impl Into<String>, store: TaskStore) -> Self {
        info!("Starting Validator Simulator");
        Self {
            hotkey: hotkey.into(),
            store,
        }
    }

    pub fn hotkey(&self) -> &str {
        &self.hotkey
    }

    /// Send `request` to every simulated miner and store the answers
    pub async fn send_request(
        &self,
        network: &SimNetwork,
        mut request: FeedbackRequest,
    ) -> Result<DendriteQueryResponse> {
        request.dendrite = Some(TerminalInfo::with_hotkey(&self.hotkey));
        if request.expire_at.is_none() {
            request.expire_at = Some(set_expire_time(FEEDBACK_TTL.as_secs() as i64));
        }

        let responses = send_in_batches(
            network.miners(),
            &request,
            SEND_BATCH_SIZE,
            |miner, req| {
                let miner = miner.clone();
                async move { miner.forward_feedback_request(req) }
            },
        )
        .await;

        let miner_responses: Vec<FeedbackRequest> = responses
            .into_iter()
            .filter(|r| r.dojo_task_id.is_some() && r.miner_hotkey().is_some())
            .collect();
        info!(
            "Request {}: {}/{} miners responded",
            request.request_id,
            miner_responses.len(),
            network.miners().len()
        );

        let query = DendriteQueryResponse {
            request,
            miner_responses,
        };
        self.store.save_dendrite_response(&query)?;
        Ok(query)
    }
}
