//! Synthetic code-generation tasks
//!
//! Pulls a generated question with model answers from the synthetic API and
//! publishes it to the worker API, once as-is and once with obfuscated HTML.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::dojo_api::DojoApi;
use crate::error::{DojoError, Result};
use crate::obfuscation::{obfuscate_completion_files, DEFAULT_TIMEOUT};
use crate::protocol::{set_expire_time, CompletionResponse, CriteriaType, FeedbackRequest, TaskType};

/// Default lifetime of a synthetic task
pub const SYNTHETIC_EXPIRY: Duration = Duration::from_secs(8 * 3600);

/// A generated question with candidate answers. `ground_truth` maps
/// completion id to rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticQa {
    pub prompt: String,
    pub responses: Vec<CompletionResponse>,
    #[serde(default)]
    pub ground_truth: HashMap<String, i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SyntheticPayload {
    Bare(SyntheticQa),
    Envelope {
        #[serde(default)]
        success: Option<bool>,
        body: Option<SyntheticQa>,
    },
}

#[derive(Debug, Clone)]
pub struct SyntheticApi {
    base_url: String,
    client: reqwest::Client,
}

impl SyntheticApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from `SYNTHETIC_API_URL`
    pub fn from_env() -> Result<Self> {
        std::env::var("SYNTHETIC_API_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|url| Self::new(&url))
            .ok_or_else(|| DojoError::Config("SYNTHETIC_API_URL is not set".to_string()))
    }

    /// Fetch one generated question. `None` when the API has nothing to offer.
    pub async fn get_qa(&self) -> Result<Option<SyntheticQa>> {
        let resp = self
            .client
            .get(format!("{}/api/synthetic-gen", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        match resp.json::<SyntheticPayload>().await? {
            SyntheticPayload::Bare(qa) => Ok(Some(qa)),
            SyntheticPayload::Envelope {
                success: Some(false),
                ..
            } => Ok(None),
            SyntheticPayload::Envelope { body, .. } => Ok(body),
        }
    }
}

/// Make model names unique when they collide. Every model gets `_<index>`;
/// a model whose completion has a ground-truth rank also gets `_<rank>`,
/// otherwise the completion id gets `_<index>`.
pub fn dedupe_model_names(qa: &mut SyntheticQa) {
    let unique: HashSet<&str> = qa.responses.iter().map(|r| r.model.as_str()).collect();
    if unique.len() == qa.responses.len() {
        info!("All responses have a unique model key");
        return;
    }

    warn!("Duplicate model names detected. Appending indices to make them unique.");
    for (index, response) in qa.responses.iter_mut().enumerate() {
        response.model = format!("{}_{}", response.model, index);
        match qa.ground_truth.get(&response.completion_id) {
            Some(rank) => response.model = format!("{}_{}", response.model, rank),
            None => response.completion_id = format!("{}_{}", response.completion_id, index),
        }
    }
}

/// CODE_GENERATION request rated with a 1..100 score per model
pub fn build_code_generation_request(qa: &SyntheticQa, expire_in: Duration) -> FeedbackRequest {
    let mut request = FeedbackRequest::new(TaskType::CodeGeneration, qa.prompt.clone());
    request.criteria_types = vec![CriteriaType::MultiScore {
        options: qa.responses.iter().map(|r| r.model.clone()).collect(),
        min: 1.0,
        max: 100.0,
    }];
    request.completion_responses = qa.responses.clone();
    request.ground_truth = qa.ground_truth.clone();
    request.expire_at = Some(set_expire_time(expire_in.as_secs() as i64));
    request
}

fn request_size(request: &FeedbackRequest) -> usize {
    serde_json::to_vec(request).map(|b| b.len()).unwrap_or(0)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyntheticOutcome {
    pub task_ids: Vec<String>,
    pub obfuscated_task_ids: Vec<String>,
}

/// Publish one synthetic question: the plain task, then (optionally) the
/// same task with obfuscated HTML files. A single obfuscated copy is sent;
/// a second obfuscated request would only duplicate the task.
pub async fn create_synthetic_tasks(
    api: &DojoApi,
    synthetic: &SyntheticApi,
    obfuscate: bool,
    expire_in: Duration,
) -> Result<SyntheticOutcome> {
    let Some(mut qa) = synthetic.get_qa().await? else {
        error!("Failed to generate synthetic data");
        return Err(DojoError::Other(
            "Failed to generate synthetic data".to_string(),
        ));
    };
    dedupe_model_names(&mut qa);

    let mut request = build_code_generation_request(&qa, expire_in);
    info!("Synthetic request: {} bytes", request_size(&request));

    let mut outcome = SyntheticOutcome {
        task_ids: api.create_task(&request).await?,
        ..Default::default()
    };

    if obfuscate {
        obfuscate_completion_files(&mut request.completion_responses, DEFAULT_TIMEOUT).await;
        info!(
            "Synthetic request after obfuscation: {} bytes",
            request_size(&request)
        );
        outcome.obfuscated_task_ids = api.create_task(&request).await?;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dojo_api::RetryPolicy;
    use httpmock::prelude::*;
    use serde_json::json;

    fn qa_json() -> serde_json::Value {
        json!({
            "prompt": "Build a bouncing ball",
            "responses": [
                {"model": "gpt", "completion_id": "c1", "completion": {"files": [
                    {"filename": "index.html", "content": "<html><body><p>ball</p></body></html>"}
                ]}},
                {"model": "gpt", "completion_id": "c2", "completion": {"files": [
                    {"filename": "index.html", "content": "<html><body><p>ball 2</p></body></html>"}
                ]}},
                {"model": "claude", "completion_id": "c3", "completion": {"files": []}}
            ],
            "ground_truth": {"c1": 1, "c3": 2}
        })
    }

    #[test]
    fn test_dedupe_model_names() {
        let mut qa: SyntheticQa = serde_json::from_value(qa_json()).unwrap();
        dedupe_model_names(&mut qa);

        let models: Vec<&str> = qa.responses.iter().map(|r| r.model.as_str()).collect();
        assert_eq!(models, vec!["gpt_0_1", "gpt_1", "claude_2_2"]);
        let ids: Vec<&str> = qa.responses.iter().map(|r| r.completion_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2_1", "c3"]);
    }

    #[test]
    fn test_unique_models_untouched() {
        let mut qa: SyntheticQa = serde_json::from_value(qa_json()).unwrap();
        qa.responses[1].model = "gemini".to_string();
        let before = qa.clone();
        dedupe_model_names(&mut qa);
        assert_eq!(qa, before);
    }

    #[test]
    fn test_build_request() {
        let qa: SyntheticQa = serde_json::from_value(qa_json()).unwrap();
        let request = build_code_generation_request(&qa, SYNTHETIC_EXPIRY);
        assert_eq!(request.task_type, TaskType::CodeGeneration);
        assert_eq!(
            request.criteria_types,
            vec![CriteriaType::MultiScore {
                options: vec!["gpt".into(), "gpt".into(), "claude".into()],
                min: 1.0,
                max: 100.0,
            }]
        );
        let expire_at = crate::protocol::parse_expire_at(request.expire_at.as_deref().unwrap()).unwrap();
        let hours = (expire_at - chrono::Utc::now()).num_minutes() as f64 / 60.0;
        assert!((7.9..=8.0).contains(&hours));
    }

    #[tokio::test]
    async fn test_get_qa_envelope_and_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/synthetic-gen");
            then.status(200)
                .json_body(json!({"success": true, "body": qa_json()}));
        });
        let qa = SyntheticApi::new(&server.base_url()).get_qa().await.unwrap().unwrap();
        assert_eq!(qa.responses.len(), 3);

        let failing = MockServer::start();
        failing.mock(|when, then| {
            when.method(GET).path("/api/synthetic-gen");
            then.status(200).json_body(json!({"success": false, "body": null}));
        });
        assert!(SyntheticApi::new(&failing.base_url()).get_qa().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_plain_and_obfuscated() {
        let synthetic_server = MockServer::start();
        synthetic_server.mock(|when, then| {
            when.method(GET).path("/api/synthetic-gen");
            then.status(200).json_body(qa_json());
        });

        let dojo_server = MockServer::start();
        let create = dojo_server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/tasks/create-tasks")
                .header("x-api-key", "key");
            then.status(200).json_body(json!({"body": ["task-1"]}));
        });

        let api = DojoApi::new(&dojo_server.base_url(), "key", 1).with_retry(RetryPolicy::immediate(1));
        let outcome = create_synthetic_tasks(
            &api,
            &SyntheticApi::new(&synthetic_server.base_url()),
            true,
            SYNTHETIC_EXPIRY,
        )
        .await
        .unwrap();

        create.assert_hits(2);
        assert_eq!(outcome.task_ids, vec!["task-1".to_string()]);
        assert_eq!(outcome.obfuscated_task_ids, vec!["task-1".to_string()]);
    }
}
