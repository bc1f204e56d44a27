//! Task Protocol Types
//!
//! Objects exchanged between validators, miners and the Dojo worker API:
//! - `FeedbackRequest`: a validator's task (prompt + completions to rate)
//! - `CriteriaType`: how workers rate the completions
//! - `TaskResult`: what workers submitted for a task
//! - `DendriteQueryResponse`: one validator request with all miner responses

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{DojoError, Result};

pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// TASK TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    #[serde(alias = "code_generation")]
    CodeGeneration,
    #[serde(alias = "text_to_image")]
    TextToImage,
    #[serde(alias = "text_to_three_d", alias = "TEXT_TO_3D", alias = "text_to_3d")]
    TextToThreeD,
    #[serde(alias = "dialogue")]
    Dialogue,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CodeGeneration => "CODE_GENERATION",
            TaskType::TextToImage => "TEXT_TO_IMAGE",
            TaskType::TextToThreeD => "TEXT_TO_THREE_D",
            TaskType::Dialogue => "DIALOGUE",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = DojoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "CODE_GENERATION" => Ok(TaskType::CodeGeneration),
            "TEXT_TO_IMAGE" => Ok(TaskType::TextToImage),
            "TEXT_TO_THREE_D" | "TEXT_TO_3D" => Ok(TaskType::TextToThreeD),
            "DIALOGUE" => Ok(TaskType::Dialogue),
            other => Err(DojoError::InvalidTask(format!("Unknown task type: {}", other))),
        }
    }
}

// ============================================================================
// CRITERIA
// ============================================================================

/// Flat criteria discriminant, used in task results and in storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CriteriaKind {
    RankingCriteria,
    Score,
    MultiSelect,
    MultiScore,
}

impl CriteriaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CriteriaKind::RankingCriteria => "RANKING_CRITERIA",
            CriteriaKind::Score => "SCORE",
            CriteriaKind::MultiSelect => "MULTI_SELECT",
            CriteriaKind::MultiScore => "MULTI_SCORE",
        }
    }
}

impl FromStr for CriteriaKind {
    type Err = DojoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RANKING_CRITERIA" => Ok(CriteriaKind::RankingCriteria),
            "SCORE" => Ok(CriteriaKind::Score),
            "MULTI_SELECT" => Ok(CriteriaKind::MultiSelect),
            "MULTI_SCORE" => Ok(CriteriaKind::MultiScore),
            other => Err(DojoError::InvalidTask(format!(
                "Unknown criteria type: {}",
                other
            ))),
        }
    }
}

/// How workers are asked to rate completions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CriteriaType {
    Ranking { options: Vec<String> },
    Score { min: f64, max: f64 },
    MultiSelect { options: Vec<String> },
    MultiScore { options: Vec<String>, min: f64, max: f64 },
}

impl CriteriaType {
    pub fn kind(&self) -> CriteriaKind {
        match self {
            CriteriaType::Ranking { .. } => CriteriaKind::RankingCriteria,
            CriteriaType::Score { .. } => CriteriaKind::Score,
            CriteriaType::MultiSelect { .. } => CriteriaKind::MultiSelect,
            CriteriaType::MultiScore { .. } => CriteriaKind::MultiScore,
        }
    }

    pub fn options(&self) -> &[String] {
        match self {
            CriteriaType::Ranking { options }
            | CriteriaType::MultiSelect { options }
            | CriteriaType::MultiScore { options, .. } => options,
            CriteriaType::Score { .. } => &[],
        }
    }

    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            CriteriaType::Score { min, max } | CriteriaType::MultiScore { min, max, .. } => {
                Some((*min, *max))
            }
            _ => None,
        }
    }
}

// ============================================================================
// COMPLETIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeFile {
    pub filename: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeAnswer {
    pub files: Vec<CodeFile>,
}

/// A model's answer: generated code files, or any other JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Completion {
    Code(CodeAnswer),
    Other(serde_json::Value),
}

impl Completion {
    pub fn files_mut(&mut self) -> Option<&mut Vec<CodeFile>> {
        match self {
            Completion::Code(answer) => Some(&mut answer.files),
            Completion::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub model: String,
    pub completion: Completion,
    #[serde(default = "new_uuid")]
    pub completion_id: String,
    #[serde(default)]
    pub rank_id: Option<i64>,
    #[serde(default)]
    pub score: Option<f64>,
}

impl CompletionResponse {
    pub fn new(model: impl Into<String>, completion: Completion) -> Self {
        Self {
            model: model.into(),
            completion,
            completion_id: new_uuid(),
            rank_id: None,
            score: None,
        }
    }
}

// ============================================================================
// REQUESTS
// ============================================================================

/// Identity of the sending (dendrite) or receiving (axon) side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminalInfo {
    #[serde(default)]
    pub hotkey: Option<String>,
}

impl TerminalInfo {
    pub fn with_hotkey(hotkey: impl Into<String>) -> Self {
        Self {
            hotkey: Some(hotkey.into()),
        }
    }
}

/// A validator's task sent to miners, or a miner's response to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default = "new_uuid")]
    pub request_id: String,
    pub task_type: TaskType,
    pub prompt: String,
    #[serde(default)]
    pub criteria_types: Vec<CriteriaType>,
    #[serde(default)]
    pub completion_responses: Vec<CompletionResponse>,
    #[serde(default)]
    pub dojo_task_id: Option<String>,
    #[serde(default)]
    pub expire_at: Option<String>,
    /// completion id -> rank
    #[serde(default)]
    pub ground_truth: HashMap<String, i64>,
    #[serde(default)]
    pub dendrite: Option<TerminalInfo>,
    #[serde(default)]
    pub axon: Option<TerminalInfo>,
}

impl FeedbackRequest {
    pub fn new(task_type: TaskType, prompt: impl Into<String>) -> Self {
        Self {
            request_id: new_uuid(),
            task_type,
            prompt: prompt.into(),
            criteria_types: Vec::new(),
            completion_responses: Vec::new(),
            dojo_task_id: None,
            expire_at: None,
            ground_truth: HashMap::new(),
            dendrite: None,
            axon: None,
        }
    }

    /// Hotkey of the validator that sent the request
    pub fn validator_hotkey(&self) -> Option<&str> {
        self.dendrite
            .as_ref()
            .and_then(|d| d.hotkey.as_deref())
            .filter(|h| !h.is_empty())
    }

    /// Hotkey of the miner that answered the request
    pub fn miner_hotkey(&self) -> Option<&str> {
        self.axon
            .as_ref()
            .and_then(|a| a.hotkey.as_deref())
            .filter(|h| !h.is_empty())
    }
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultData {
    #[serde(rename = "type")]
    pub kind: CriteriaKind,
    /// model -> rank or score
    pub value: HashMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub status: String,
    #[serde(alias = "createdAt")]
    pub created_at: String,
    #[serde(alias = "updatedAt")]
    pub updated_at: String,
    #[serde(alias = "resultData")]
    pub result_data: Vec<ResultData>,
    #[serde(alias = "workerId")]
    pub worker_id: String,
    #[serde(alias = "taskId")]
    pub task_id: String,
}

/// Validator -> miner query for the results of one Dojo task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultRequest {
    pub task_id: String,
    #[serde(default)]
    pub task_results: Vec<TaskResult>,
}

impl TaskResultRequest {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            task_results: Vec::new(),
        }
    }
}

/// One validator request together with every miner response to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DendriteQueryResponse {
    pub request: FeedbackRequest,
    pub miner_responses: Vec<FeedbackRequest>,
}

// ============================================================================
// TIME HELPERS
// ============================================================================

/// ISO-8601 timestamp `expire_in_secs` from now
pub fn set_expire_time(expire_in_secs: i64) -> String {
    (Utc::now() + chrono::Duration::seconds(expire_in_secs)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an `expire_at` value. Timestamps without an offset are UTC.
pub fn parse_expire_at(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| DojoError::InvalidTask(format!("Invalid expire_at '{}': {}", value, e)))
}

pub fn datetime_to_iso8601(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_type_parsing() {
        assert_eq!("code_generation".parse::<TaskType>().unwrap(), TaskType::CodeGeneration);
        assert_eq!("TEXT_TO_3D".parse::<TaskType>().unwrap(), TaskType::TextToThreeD);
        assert!("poetry".parse::<TaskType>().is_err());

        let parsed: TaskType = serde_json::from_value(json!("text_to_three_d")).unwrap();
        assert_eq!(parsed, TaskType::TextToThreeD);
        assert_eq!(serde_json::to_value(TaskType::CodeGeneration).unwrap(), json!("CODE_GENERATION"));
    }

    #[test]
    fn test_criteria_type_tagging() {
        let criteria = CriteriaType::MultiScore {
            options: vec!["a".to_string(), "b".to_string()],
            min: 1.0,
            max: 100.0,
        };
        let value = serde_json::to_value(&criteria).unwrap();
        assert_eq!(value["type"], "multi-score");
        assert_eq!(criteria.kind(), CriteriaKind::MultiScore);
        assert_eq!(criteria.bounds(), Some((1.0, 100.0)));
        assert_eq!(criteria.options().len(), 2);

        let ranking: CriteriaType =
            serde_json::from_value(json!({"type": "ranking", "options": ["x"]})).unwrap();
        assert_eq!(ranking.kind(), CriteriaKind::RankingCriteria);
        assert_eq!(ranking.bounds(), None);
    }

    #[test]
    fn test_completion_untagged() {
        let code: Completion = serde_json::from_value(json!({
            "files": [{"filename": "index.html", "content": "<html></html>"}]
        }))
        .unwrap();
        assert!(matches!(code, Completion::Code(_)));

        let mut other: Completion = serde_json::from_value(json!("plain text answer")).unwrap();
        assert!(other.files_mut().is_none());
    }

    #[test]
    fn test_feedback_request_defaults() {
        let request: FeedbackRequest = serde_json::from_value(json!({
            "task_type": "CODE_GENERATION",
            "prompt": "build a clock",
        }))
        .unwrap();
        assert!(!request.request_id.is_empty());
        assert!(request.completion_responses.is_empty());
        assert!(request.validator_hotkey().is_none());
    }

    #[test]
    fn test_hotkey_accessors_ignore_empty() {
        let mut request = FeedbackRequest::new(TaskType::Dialogue, "hi");
        request.dendrite = Some(TerminalInfo::with_hotkey(""));
        assert!(request.validator_hotkey().is_none());

        request.axon = Some(TerminalInfo::with_hotkey("5Miner"));
        assert_eq!(request.miner_hotkey(), Some("5Miner"));
    }

    #[test]
    fn test_task_result_accepts_camel_case() {
        let result: TaskResult = serde_json::from_value(json!({
            "id": "r1",
            "status": "COMPLETED",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z",
            "resultData": [{"type": "MULTI_SCORE", "value": {"model-a": 80.0}}],
            "workerId": "w1",
            "taskId": "t1"
        }))
        .unwrap();
        assert_eq!(result.result_data[0].kind, CriteriaKind::MultiScore);
        assert_eq!(result.task_id, "t1");
    }

    #[test]
    fn test_expire_time_is_in_future() {
        let expire_at = set_expire_time(3600);
        let parsed = parse_expire_at(&expire_at).unwrap();
        assert!(parsed > Utc::now());
    }

    #[test]
    fn test_parse_expire_at_naive_is_utc() {
        let parsed = parse_expire_at("2030-05-01T12:00:00").unwrap();
        assert_eq!(datetime_to_iso8601(parsed), "2030-05-01T12:00:00Z");
        assert!(parse_expire_at("tomorrow").is_err());
    }
}
