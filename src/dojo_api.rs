//! Dojo worker API client
//!
//! Validators publish tasks to the Dojo API for human workers and later
//! collect the workers' results. Every call is retried with exponential
//! backoff and jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::task_max_results;
use crate::error::{DojoError, Result};
use crate::protocol::{Completion, FeedbackRequest, TaskResult};

pub const CODE_GEN_TASK_TITLE: &str = "LLM Code Generation Task";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// RETRY POLICY
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound of the random delay added to each backoff
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Delay before retrying after the failed `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.base_delay * 2u32.saturating_pow(attempt);
        if self.jitter.is_zero() {
            return backoff;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=self.jitter.as_secs_f64());
        backoff + Duration::from_secs_f64(jitter)
    }

    /// Run `op` until it succeeds or the attempts run out. Returns the last error.
    pub async fn retry<T, E, F, Fut>(&self, what: &str, mut op: F) -> std::result::Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let attempts = self.max_retries.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "Error occurred while {}: {}. Retrying in {:.2} seconds...",
                        what,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// PAYLOADS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDataResponse {
    pub model: String,
    pub completion: Completion,
}

/// `taskData` entry sent to the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskData {
    pub prompt: String,
    pub responses: Vec<TaskDataResponse>,
    pub task_type: String,
}

pub fn serialize_task_request(request: &FeedbackRequest) -> TaskData {
    TaskData {
        prompt: request.prompt.clone(),
        responses: request
            .completion_responses
            .iter()
            .map(|c| TaskDataResponse {
                model: c.model.clone(),
                completion: c.completion.clone(),
            })
            .collect(),
        task_type: request.task_type.as_str().to_uppercase(),
    }
}

#[derive(Debug, Deserialize)]
struct TaskResultsEnvelope {
    #[serde(default)]
    body: Option<TaskResultsBody>,
}

#[derive(Debug, Deserialize)]
struct TaskResultsBody {
    #[serde(default, rename = "taskResults")]
    task_results: Option<Vec<TaskResult>>,
}

/// Failure of one `create-tasks` attempt
#[derive(Debug)]
enum CreateAttemptError {
    Http(String),
    Decode(String),
    Unexpected(String),
}

impl CreateAttemptError {
    fn class(&self) -> &'static str {
        match self {
            CreateAttemptError::Http(_) => "HTTP error",
            CreateAttemptError::Decode(_) => "JSON decode error",
            CreateAttemptError::Unexpected(_) => "unexpected error",
        }
    }
}

impl std::fmt::Display for CreateAttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateAttemptError::Http(m)
            | CreateAttemptError::Decode(m)
            | CreateAttemptError::Unexpected(m) => f.write_str(m),
        }
    }
}

// ============================================================================
// CLIENT
// ============================================================================

#[derive(Clone)]
pub struct DojoApi {
    base_url: String,
    api_key: String,
    max_results: u32,
    timeout: Duration,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl std::fmt::Debug for DojoApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DojoApi")
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("max_results", &self.max_results)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl DojoApi {
    pub fn new(base_url: &str, api_key: &str, max_results: u32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            max_results,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from `DOJO_API_BASE_URL`, `DOJO_API_KEY` and `TASK_MAX_RESULTS`
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("DOJO_API_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| DojoError::Config("DOJO_API_BASE_URL is not set".to_string()))?;
        let api_key = std::env::var("DOJO_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| DojoError::Config("DOJO_API_KEY is not set".to_string()))?;
        Ok(Self::new(&base_url, &api_key, task_max_results()))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn max_results(&self) -> u32 {
        self.max_results
    }

    /// Raw task document
    pub async fn get_task_by_id(&self, task_id: &str) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(format!("{}/api/v1/tasks/{}", self.base_url, task_id))
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn fetch_task_results(&self, task_id: &str) -> Result<Option<Vec<TaskResult>>> {
        let resp = self
            .client
            .get(format!("{}/api/v1/tasks/task-result/{}", self.base_url, task_id))
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        let envelope: TaskResultsEnvelope = resp.json().await?;
        Ok(envelope
            .body
            .and_then(|b| b.task_results)
            .filter(|results| !results.is_empty()))
    }

    /// Worker results for a task, `None` when there are none yet or every attempt failed
    pub async fn get_task_results_by_task_id(&self, task_id: &str) -> Option<Vec<TaskResult>> {
        let what = format!("getting task results for task_id {}", task_id);
        match self
            .retry
            .retry(&what, || self.fetch_task_results(task_id))
            .await
        {
            Ok(results) => results,
            Err(e) => {
                error!(
                    "Failed to get task results for task_id {} after {} attempts: {}",
                    task_id, self.retry.max_retries, e
                );
                None
            }
        }
    }

    async fn create_task_once(
        &self,
        request: &FeedbackRequest,
        expire_at: &str,
        last_text: &parking_lot::Mutex<String>,
    ) -> std::result::Result<Vec<String>, CreateAttemptError> {
        let task_data = serde_json::to_string(&[serialize_task_request(request)])
            .map_err(|e| CreateAttemptError::Unexpected(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .text("title", CODE_GEN_TASK_TITLE)
            .text("body", request.prompt.clone())
            .text("expireAt", expire_at.to_string())
            .text("taskData", task_data)
            .text("maxResults", self.max_results.to_string());

        let resp = self
            .client
            .post(format!("{}/api/v1/tasks/create-tasks", self.base_url))
            .header("x-api-key", &self.api_key)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CreateAttemptError::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| CreateAttemptError::Http(e.to_string()))?;
        *last_text.lock() = text.clone();

        let json: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| CreateAttemptError::Decode(e.to_string()))?;

        if status == reqwest::StatusCode::OK {
            let task_ids: Vec<String> = serde_json::from_value(json["body"].clone())
                .map_err(|e| CreateAttemptError::Decode(e.to_string()))?;
            return Ok(task_ids);
        }

        error!(
            "Error occurred when trying to create task\nErr:{}",
            json.get("error").unwrap_or(&serde_json::Value::Null)
        );
        Err(CreateAttemptError::Http(format!(
            "server returned {}",
            status
        )))
    }

    /// Publish a task for workers. Returns the created task ids.
    pub async fn create_task(&self, request: &FeedbackRequest) -> Result<Vec<String>> {
        let expire_at = request
            .expire_at
            .as_deref()
            .ok_or_else(|| DojoError::InvalidTask("expire_at is not set".to_string()))?;

        let last_text = parking_lot::Mutex::new(String::new());
        match self
            .retry
            .retry("creating task", || {
                self.create_task_once(request, expire_at, &last_text)
            })
            .await
        {
            Ok(task_ids) => {
                info!("Successfully created task with task ids: {:?}", task_ids);
                Ok(task_ids)
            }
            Err(e) => Err(DojoError::CreateTaskFailed(format!(
                "Failed to create task due to {}: {}, response_text: {}",
                e.class(),
                e,
                last_text.lock()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CodeAnswer, CodeFile, CompletionResponse, TaskType};
    use httpmock::prelude::*;
    use serde_json::json;

    fn request() -> FeedbackRequest {
        let mut request = FeedbackRequest::new(TaskType::CodeGeneration, "build a clock");
        request.expire_at = Some("2030-01-01T00:00:00Z".to_string());
        request.completion_responses = vec![CompletionResponse::new(
            "model-a",
            Completion::Code(CodeAnswer {
                files: vec![CodeFile {
                    filename: "index.html".to_string(),
                    content: "<html></html>".to_string(),
                    language: None,
                }],
            }),
        )];
        request
    }

    fn api(server: &MockServer) -> DojoApi {
        DojoApi::new(&server.base_url(), "test-key", 3).with_retry(RetryPolicy::immediate(5))
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        for attempt in 0..4 {
            let delay = policy.delay_for(attempt);
            let base = Duration::from_secs(1u64 << attempt);
            assert!(delay >= base);
            assert!(delay <= base + Duration::from_secs(1));
        }
        assert_eq!(RetryPolicy::immediate(3).delay_for(2), Duration::ZERO);
    }

    #[test]
    fn test_serialize_task_request() {
        let data = serialize_task_request(&request());
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["task_type"], "CODE_GENERATION");
        assert_eq!(value["prompt"], "build a clock");
        assert_eq!(value["responses"][0]["model"], "model-a");
        assert_eq!(
            value["responses"][0]["completion"]["files"][0]["filename"],
            "index.html"
        );
    }

    #[test]
    fn test_debug_hides_api_key() {
        let api = DojoApi::new("http://localhost:3000/", "secret-key", 1);
        let debug = format!("{:?}", api);
        assert!(!debug.contains("secret-key"));
        assert_eq!(api.base_url(), "http://localhost:3000");
    }

    #[tokio::test]
    async fn test_create_task_success() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/tasks/create-tasks")
                .header("x-api-key", "test-key")
                .body_contains(CODE_GEN_TASK_TITLE)
                .body_contains("maxResults");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"success": true, "body": ["task-1"], "error": null}));
        });

        let ids = api(&server).create_task(&request()).await.unwrap();
        assert_eq!(ids, vec!["task-1".to_string()]);
        mock.assert();
    }

    #[tokio::test]
    async fn test_create_task_retries_then_fails() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/v1/tasks/create-tasks");
            then.status(400)
                .header("content-type", "application/json")
                .json_body(json!({"success": false, "body": null, "error": "bad expireAt"}));
        });

        let err = api(&server).create_task(&request()).await.unwrap_err();
        mock.assert_hits(5);
        let message = err.to_string();
        assert!(matches!(err, DojoError::CreateTaskFailed(_)));
        assert!(message.contains("HTTP error"));
        assert!(message.contains("bad expireAt"));
    }

    #[tokio::test]
    async fn test_create_task_non_json_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/v1/tasks/create-tasks");
            then.status(502).body("Bad Gateway");
        });

        let err = api(&server)
            .with_retry(RetryPolicy::immediate(1))
            .create_task(&request())
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("JSON decode error"));
        assert!(message.contains("Bad Gateway"));
    }

    #[tokio::test]
    async fn test_create_task_requires_expiry() {
        let server = MockServer::start();
        let mut request = request();
        request.expire_at = None;
        let err = api(&server).create_task(&request).await.unwrap_err();
        assert!(matches!(err, DojoError::InvalidTask(_)));
    }

    #[tokio::test]
    async fn test_get_task_results() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/tasks/task-result/task-1");
            then.status(200).json_body(json!({
                "success": true,
                "body": {"taskResults": [{
                    "id": "r1",
                    "status": "COMPLETED",
                    "createdAt": "2024-01-01T00:00:00Z",
                    "updatedAt": "2024-01-01T00:00:00Z",
                    "resultData": [{"type": "MULTI_SCORE", "value": {"model-a": 75.0}}],
                    "workerId": "w1",
                    "taskId": "task-1"
                }]}
            }));
        });

        let results = api(&server)
            .get_task_results_by_task_id("task-1")
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result_data[0].value["model-a"], 75.0);
    }

    #[tokio::test]
    async fn test_get_task_results_empty_is_none() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/tasks/task-result/task-2");
            then.status(200)
                .json_body(json!({"success": true, "body": {"taskResults": []}}));
        });

        assert!(api(&server)
            .get_task_results_by_task_id("task-2")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_get_task_results_gives_up_after_retries() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/v1/tasks/task-result/task-3");
            then.status(500);
        });

        assert!(api(&server)
            .get_task_results_by_task_id("task-3")
            .await
            .is_none());
        mock.assert_hits(5);
    }

    #[tokio::test]
    async fn test_get_task_by_id() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/v1/tasks/task-1");
            then.status(200)
                .json_body(json!({"body": {"status": "COMPLETED"}}));
        });

        let task = api(&server).get_task_by_id("task-1").await.unwrap();
        assert_eq!(task["body"]["status"], "COMPLETED");
    }
}
