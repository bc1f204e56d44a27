//! Conversions between protocol objects and task store rows

use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{DojoError, Result};
use crate::protocol::{
    datetime_to_iso8601, new_uuid, parse_expire_at, Completion, CompletionResponse, CriteriaKind,
    CriteriaType, FeedbackRequest, TaskType, TerminalInfo,
};

/// One `feedback_requests` row. Validator requests have no parent.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackRequestRow {
    pub id: String,
    pub request_id: String,
    pub task_type: String,
    pub prompt: String,
    pub hotkey: String,
    /// Unix seconds
    pub expire_at: i64,
    pub dojo_task_id: Option<String>,
    pub parent_id: Option<String>,
    pub is_processed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRow {
    pub completion_id: String,
    pub model: String,
    /// Serialized `Completion`
    pub completion: String,
    pub rank_id: Option<i64>,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CriteriaRow {
    pub kind: CriteriaKind,
    pub options: Vec<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruthRow {
    pub obfuscated_model_id: String,
    pub real_model_id: String,
    pub rank_id: i64,
}

/// A request row with everything attached to it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRequest {
    pub row: FeedbackRequestRow,
    pub completions: Vec<CompletionRow>,
    pub criteria: Vec<CriteriaRow>,
    pub ground_truths: Vec<GroundTruthRow>,
}

pub fn timestamp_to_datetime(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

// ============================================================================
// PROTOCOL -> ROWS
// ============================================================================

pub fn map_parent_feedback_request(request: &FeedbackRequest) -> Result<FeedbackRequestRow> {
    let hotkey = request.validator_hotkey().ok_or_else(|| {
        DojoError::InvalidValidatorRequest("Validator Hotkey is required".to_string())
    })?;

    let expire_at = request
        .expire_at
        .as_deref()
        .ok_or_else(|| DojoError::InvalidValidatorRequest("Expire at is required".to_string()))?;
    let expire_at = parse_expire_at(expire_at)
        .map_err(|e| DojoError::InvalidValidatorRequest(e.to_string()))?;
    if expire_at < Utc::now() {
        return Err(DojoError::InvalidValidatorRequest(
            "Expire at must be in the future".to_string(),
        ));
    }

    Ok(FeedbackRequestRow {
        id: new_uuid(),
        request_id: request.request_id.clone(),
        task_type: request.task_type.as_str().to_string(),
        prompt: request.prompt.clone(),
        hotkey: hotkey.to_string(),
        expire_at: expire_at.timestamp(),
        dojo_task_id: request.dojo_task_id.clone(),
        parent_id: None,
        is_processed: false,
    })
}

pub fn map_child_feedback_request(
    request: &FeedbackRequest,
    parent_id: &str,
    expire_at: DateTime<Utc>,
) -> Result<FeedbackRequestRow> {
    let hotkey = request
        .miner_hotkey()
        .ok_or_else(|| DojoError::InvalidMinerResponse("Miner Hotkey is required".to_string()))?;

    if parent_id.is_empty() {
        return Err(DojoError::InvalidMinerResponse(
            "Parent ID is required".to_string(),
        ));
    }

    let dojo_task_id = request
        .dojo_task_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            DojoError::InvalidMinerResponse("Dojo Task ID is required".to_string())
        })?;

    Ok(FeedbackRequestRow {
        id: new_uuid(),
        request_id: request.request_id.clone(),
        task_type: request.task_type.as_str().to_string(),
        prompt: request.prompt.clone(),
        hotkey: hotkey.to_string(),
        expire_at: expire_at.timestamp(),
        dojo_task_id: Some(dojo_task_id.to_string()),
        parent_id: Some(parent_id.to_string()),
        is_processed: false,
    })
}

pub fn map_completion_response(response: &CompletionResponse) -> Result<CompletionRow> {
    Ok(CompletionRow {
        completion_id: response.completion_id.clone(),
        model: response.model.clone(),
        completion: serde_json::to_string(&response.completion)?,
        rank_id: response.rank_id,
        score: response.score,
    })
}

pub fn map_criteria_type(criteria: &CriteriaType) -> CriteriaRow {
    let (min, max) = match criteria.bounds() {
        Some((min, max)) => (Some(min), Some(max)),
        None => (None, None),
    };
    CriteriaRow {
        kind: criteria.kind(),
        options: criteria.options().to_vec(),
        min,
        max,
    }
}

/// Ground truth keyed by obfuscated id, resolved to the model of the
/// completion carrying that id when there is one
pub fn map_ground_truth(request: &FeedbackRequest) -> Vec<GroundTruthRow> {
    let mut rows: Vec<GroundTruthRow> = request
        .ground_truth
        .iter()
        .map(|(obfuscated_id, rank_id)| {
            let real_model_id = request
                .completion_responses
                .iter()
                .find(|c| &c.completion_id == obfuscated_id)
                .map(|c| c.model.clone())
                .unwrap_or_else(|| obfuscated_id.clone());
            GroundTruthRow {
                obfuscated_model_id: obfuscated_id.clone(),
                real_model_id,
                rank_id: *rank_id,
            }
        })
        .collect();
    rows.sort_by(|a, b| a.obfuscated_model_id.cmp(&b.obfuscated_model_id));
    rows
}

// ============================================================================
// ROWS -> PROTOCOL
// ============================================================================

pub fn map_criteria_row(row: &CriteriaRow) -> CriteriaType {
    let min = row.min.unwrap_or(0.0);
    let max = row.max.unwrap_or(0.0);
    match row.kind {
        CriteriaKind::RankingCriteria => CriteriaType::Ranking {
            options: row.options.clone(),
        },
        CriteriaKind::Score => CriteriaType::Score { min, max },
        CriteriaKind::MultiSelect => CriteriaType::MultiSelect {
            options: row.options.clone(),
        },
        CriteriaKind::MultiScore => CriteriaType::MultiScore {
            options: row.options.clone(),
            min,
            max,
        },
    }
}

pub fn map_completion_row(row: &CompletionRow) -> Result<CompletionResponse> {
    let completion: Completion = serde_json::from_str(&row.completion)?;
    Ok(CompletionResponse {
        model: row.model.clone(),
        completion,
        completion_id: row.completion_id.clone(),
        rank_id: row.rank_id,
        score: row.score,
    })
}

/// Rebuild a request. Miner responses carry the hotkey as axon, validator
/// requests as dendrite together with their ground truth.
pub fn map_stored_request(stored: &StoredRequest, is_miner: bool) -> Result<FeedbackRequest> {
    if stored.completions.is_empty() {
        return Err(DojoError::InvalidCompletion(format!(
            "No completion responses found to map for {}",
            stored.row.id
        )));
    }

    let completion_responses = stored
        .completions
        .iter()
        .map(map_completion_row)
        .collect::<Result<Vec<_>>>()?;

    let mut request = FeedbackRequest::new(
        TaskType::from_str(&stored.row.task_type)?,
        stored.row.prompt.clone(),
    );
    request.request_id = stored.row.request_id.clone();
    request.criteria_types = stored.criteria.iter().map(map_criteria_row).collect();
    request.completion_responses = completion_responses;
    request.dojo_task_id = stored.row.dojo_task_id.clone();
    request.expire_at = Some(datetime_to_iso8601(timestamp_to_datetime(
        stored.row.expire_at,
    )));

    if is_miner {
        request.axon = Some(TerminalInfo::with_hotkey(&stored.row.hotkey));
    } else {
        request.dendrite = Some(TerminalInfo::with_hotkey(&stored.row.hotkey));
        request.ground_truth = stored
            .ground_truths
            .iter()
            .map(|gt| (gt.obfuscated_model_id.clone(), gt.rank_id))
            .collect::<HashMap<_, _>>();
    }

    Ok(request)
}
