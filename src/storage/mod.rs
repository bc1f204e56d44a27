//! Validator Task Store
//!
//! SQLite persistence for validator requests and the miner responses to
//! them:
//! - `feedback_requests`: validator requests (no parent) and miner responses
//! - `completions`, `criteria`, `ground_truths`: attached to a request row
//! - `scores`: the single persisted score vector

pub mod mappers;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{DojoError, Result};
use crate::protocol::{parse_expire_at, CriteriaKind, DendriteQueryResponse, FeedbackRequest};
use mappers::{
    map_child_feedback_request, map_completion_response, map_criteria_type, map_ground_truth,
    map_parent_feedback_request, map_stored_request, CompletionRow, CriteriaRow,
    FeedbackRequestRow, GroundTruthRow, StoredRequest,
};

/// Seconds workers get before a task's results are collected
pub const TASK_DEADLINE_SECS: i64 = 6 * 60 * 60;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS feedback_requests (
    id TEXT PRIMARY KEY,
    request_id TEXT NOT NULL,
    task_type TEXT NOT NULL,
    prompt TEXT NOT NULL,
    hotkey TEXT NOT NULL,
    expire_at INTEGER NOT NULL,
    dojo_task_id TEXT,
    parent_id TEXT REFERENCES feedback_requests(id),
    is_processed INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_requests_request_id ON feedback_requests(request_id);
CREATE INDEX IF NOT EXISTS idx_requests_parent ON feedback_requests(parent_id);

CREATE TABLE IF NOT EXISTS completions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feedback_request_id TEXT NOT NULL REFERENCES feedback_requests(id),
    completion_id TEXT NOT NULL,
    model TEXT NOT NULL,
    completion TEXT NOT NULL,
    rank_id INTEGER,
    score REAL
);

CREATE INDEX IF NOT EXISTS idx_completions_request ON completions(feedback_request_id);

CREATE TABLE IF NOT EXISTS criteria (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feedback_request_id TEXT NOT NULL REFERENCES feedback_requests(id),
    kind TEXT NOT NULL,
    options TEXT NOT NULL,
    min REAL,
    max REAL
);

CREATE TABLE IF NOT EXISTS ground_truths (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feedback_request_id TEXT NOT NULL REFERENCES feedback_requests(id),
    obfuscated_model_id TEXT NOT NULL,
    real_model_id TEXT NOT NULL,
    rank_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS scores (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    score TEXT NOT NULL,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);
"#;

const REQUEST_COLUMNS: &str =
    "rowid, id, request_id, task_type, prompt, hotkey, expire_at, dojo_task_id, parent_id, is_processed";

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn read_request_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, FeedbackRequestRow)> {
    Ok((
        row.get(0)?,
        FeedbackRequestRow {
            id: row.get(1)?,
            request_id: row.get(2)?,
            task_type: row.get(3)?,
            prompt: row.get(4)?,
            hotkey: row.get(5)?,
            expire_at: row.get(6)?,
            dojo_task_id: row.get(7)?,
            parent_id: row.get(8)?,
            is_processed: row.get::<_, i32>(9)? != 0,
        },
    ))
}

fn insert_request(tx: &Transaction<'_>, row: &FeedbackRequestRow) -> Result<()> {
    tx.execute(
        "INSERT INTO feedback_requests
         (id, request_id, task_type, prompt, hotkey, expire_at, dojo_task_id, parent_id, is_processed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            row.id,
            row.request_id,
            row.task_type,
            row.prompt,
            row.hotkey,
            row.expire_at,
            row.dojo_task_id,
            row.parent_id,
            row.is_processed as i32
        ],
    )?;
    Ok(())
}

fn insert_completions(
    tx: &Transaction<'_>,
    feedback_request_id: &str,
    request: &FeedbackRequest,
) -> Result<()> {
    for completion in &request.completion_responses {
        let row = map_completion_response(completion)?;
        tx.execute(
            "INSERT INTO completions (feedback_request_id, completion_id, model, completion, rank_id, score)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                feedback_request_id,
                row.completion_id,
                row.model,
                row.completion,
                row.rank_id,
                row.score
            ],
        )?;
    }
    Ok(())
}

fn insert_criteria(
    tx: &Transaction<'_>,
    feedback_request_id: &str,
    request: &FeedbackRequest,
) -> Result<()> {
    for criteria in &request.criteria_types {
        let row = map_criteria_type(criteria);
        tx.execute(
            "INSERT INTO criteria (feedback_request_id, kind, options, min, max)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                feedback_request_id,
                row.kind.as_str(),
                serde_json::to_string(&row.options)?,
                row.min,
                row.max
            ],
        )?;
    }
    Ok(())
}

fn load_stored(conn: &Connection, row: FeedbackRequestRow) -> Result<StoredRequest> {
    let completions = conn
        .prepare(
            "SELECT completion_id, model, completion, rank_id, score
             FROM completions WHERE feedback_request_id = ?1 ORDER BY id ASC",
        )?
        .query_map(params![row.id], |r| {
            Ok(CompletionRow {
                completion_id: r.get(0)?,
                model: r.get(1)?,
                completion: r.get(2)?,
                rank_id: r.get(3)?,
                score: r.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let raw_criteria = conn
        .prepare(
            "SELECT kind, options, min, max FROM criteria
             WHERE feedback_request_id = ?1 ORDER BY id ASC",
        )?
        .query_map(params![row.id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<f64>>(2)?,
                r.get::<_, Option<f64>>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let criteria = raw_criteria
        .into_iter()
        .map(|(kind, options, min, max)| -> Result<CriteriaRow> {
            Ok(CriteriaRow {
                kind: kind.parse::<CriteriaKind>()?,
                options: serde_json::from_str(&options)?,
                min,
                max,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let ground_truths = conn
        .prepare(
            "SELECT obfuscated_model_id, real_model_id, rank_id FROM ground_truths
             WHERE feedback_request_id = ?1 ORDER BY id ASC",
        )?
        .query_map(params![row.id], |r| {
            Ok(GroundTruthRow {
                obfuscated_model_id: r.get(0)?,
                real_model_id: r.get(1)?,
                rank_id: r.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(StoredRequest {
        row,
        completions,
        criteria,
        ground_truths,
    })
}

/// Map miner rows, skipping any that cannot be rebuilt
fn map_miner_rows(conn: &Connection, rows: Vec<FeedbackRequestRow>) -> Result<Vec<FeedbackRequest>> {
    let mut responses = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row.id.clone();
        match map_stored_request(&load_stored(conn, row)?, true) {
            Ok(response) => responses.push(response),
            Err(e) => warn!("Skipping miner response {}: {}", id, e),
        }
    }
    Ok(responses)
}

// ============================================================================
// STORE
// ============================================================================

#[derive(Clone)]
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl TaskStore {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Task store initialized at {:?}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create in-memory storage (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Store a validator request. Returns the row id miner responses attach to.
    pub fn save_validator_request(&self, request: &FeedbackRequest) -> Result<String> {
        let row = map_parent_feedback_request(request)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        insert_request(&tx, &row)?;
        insert_criteria(&tx, &row.id, request)?;
        insert_completions(&tx, &row.id, request)?;
        for gt in map_ground_truth(request) {
            tx.execute(
                "INSERT INTO ground_truths (feedback_request_id, obfuscated_model_id, real_model_id, rank_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![row.id, gt.obfuscated_model_id, gt.real_model_id, gt.rank_id],
            )?;
        }
        tx.commit()?;

        Ok(row.id)
    }

    /// Store a miner's response under the validator request row `parent_id`
    pub fn save_miner_response(
        &self,
        parent_id: &str,
        response: &FeedbackRequest,
        expire_at: DateTime<Utc>,
    ) -> Result<String> {
        let row = map_child_feedback_request(response, parent_id, expire_at)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        insert_request(&tx, &row)?;
        insert_criteria(&tx, &row.id, response)?;
        insert_completions(&tx, &row.id, response)?;
        tx.commit()?;

        Ok(row.id)
    }

    /// Store a validator request together with the miner responses that are valid
    pub fn save_dendrite_response(&self, query: &DendriteQueryResponse) -> Result<String> {
        let parent_id = self.save_validator_request(&query.request)?;
        let expire_at = match query.request.expire_at.as_deref() {
            Some(value) => parse_expire_at(value)?,
            None => Utc::now(),
        };

        let mut saved = 0;
        for response in &query.miner_responses {
            match self.save_miner_response(&parent_id, response, expire_at) {
                Ok(_) => saved += 1,
                Err(e) => warn!("Not saving miner response: {}", e),
            }
        }
        info!(
            "Saved request {} with {}/{} miner responses",
            query.request.request_id,
            saved,
            query.miner_responses.len()
        );
        Ok(parent_id)
    }

    /// Mark validator requests and their miner responses as processed
    pub fn mark_tasks_processed_by_request_ids(&self, request_ids: &[String]) -> Result<usize> {
        if request_ids.is_empty() {
            error!("No request ids provided to mark as processed");
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let num_updated = tx.execute(
            &format!(
                "UPDATE feedback_requests SET is_processed = 1 WHERE request_id IN ({})",
                placeholders(request_ids.len())
            ),
            params_from_iter(request_ids.iter()),
        )?;
        tx.commit()?;

        info!(
            "Marked {} records associated to {} tasks as processed",
            num_updated,
            request_ids.len()
        );
        Ok(num_updated)
    }

    fn replace_miner_completions(
        &self,
        request_id: &str,
        miner_responses: &[FeedbackRequest],
    ) -> Result<Vec<String>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut miner_hotkeys = Vec::with_capacity(miner_responses.len());
        for response in miner_responses {
            let hotkey = response.miner_hotkey().ok_or_else(|| {
                DojoError::InvalidMinerResponse(format!(
                    "Miner response {} must have a hotkey",
                    response.request_id
                ))
            })?;
            miner_hotkeys.push(hotkey.to_string());
        }

        for (response, hotkey) in miner_responses.iter().zip(&miner_hotkeys) {
            let row_id: String = tx
                .query_row(
                    "SELECT id FROM feedback_requests
                     WHERE request_id = ?1 AND hotkey = ?2 AND parent_id IS NOT NULL",
                    params![request_id, hotkey],
                    |r| r.get(0),
                )
                .optional()?
                .ok_or_else(|| {
                    DojoError::InvalidMinerResponse(format!(
                        "Miner response not found for {}",
                        hotkey
                    ))
                })?;

            tx.execute(
                "DELETE FROM completions WHERE feedback_request_id = ?1",
                params![row_id],
            )?;
            insert_completions(&tx, &row_id, response)?;
        }

        tx.commit()?;
        Ok(miner_hotkeys)
    }

    /// Replace the completions of each miner's response to `request_id`.
    /// All or nothing; returns false on any failure.
    pub fn update_miner_completions_by_request_id(
        &self,
        request_id: &str,
        miner_responses: &[FeedbackRequest],
    ) -> bool {
        match self.replace_miner_completions(request_id, miner_responses) {
            Ok(hotkeys) => {
                info!("Successfully updated completion data for miners: {:?}", hotkeys);
                true
            }
            Err(e) => {
                error!("Failed to update completion data for miner responses: {}", e);
                false
            }
        }
    }

    /// Persist the score vector. An all-zero vector is not saved.
    pub fn save_scores(&self, scores: &[f64]) -> Result<bool> {
        if scores.iter().all(|s| *s == 0.0) {
            warn!("Scores are all zero. Skipping save.");
            return Ok(false);
        }

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO scores (id, score, updated_at) VALUES (1, ?1, strftime('%s', 'now'))
             ON CONFLICT(id) DO UPDATE SET score = excluded.score, updated_at = excluded.updated_at",
            params![serde_json::to_string(scores)?],
        )?;
        info!("Saved validator scores for {} uids", scores.len());
        Ok(true)
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn load_scores(&self) -> Result<Option<Vec<f64>>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row("SELECT score FROM scores WHERE id = 1", [], |r| r.get(0))
            .optional()?;
        raw.map(|s| serde_json::from_str(&s).map_err(DojoError::from))
            .transpose()
    }

    /// Batches of unprocessed, unexpired validator requests for the given
    /// validator hotkeys, newest first
    pub fn unexpired_task_batches(
        &self,
        validator_hotkeys: &[String],
        batch_size: usize,
    ) -> Result<TaskBatches> {
        let hotkeys: Vec<String> = validator_hotkeys.iter().map(|h| h.to_lowercase()).collect();
        let now = Utc::now().timestamp();

        let (unprocessed, processed) = {
            let conn = self.conn.lock();
            (
                count_validator_requests(&conn, &hotkeys, now, false)?,
                count_validator_requests(&conn, &hotkeys, now, true)?,
            )
        };

        if unprocessed == 0 {
            if processed > 0 {
                return Err(DojoError::UnexpiredTasksAlreadyProcessed(format!(
                    "No remaining unexpired tasks found for processing, but don't worry as you have processed {} tasks.",
                    processed
                )));
            }
            return Err(DojoError::NoNewUnexpiredTasksYet(format!(
                "No unexpired tasks found for processing, please wait for tasks to pass the task deadline of {} seconds.",
                TASK_DEADLINE_SECS
            )));
        }

        Ok(TaskBatches {
            conn: self.conn.clone(),
            hotkeys,
            now,
            batch_size: batch_size.max(1),
            remaining: unprocessed,
            cursor: None,
        })
    }

    /// A validator request and all of its miner responses
    pub fn get_task_by_request_id(&self, request_id: &str) -> Option<DendriteQueryResponse> {
        match self.load_task(request_id) {
            Ok(task) => Some(task),
            Err(e) => {
                error!("Failed to get feedback request by request_id: {}", e);
                None
            }
        }
    }

    fn load_task(&self, request_id: &str) -> Result<DendriteQueryResponse> {
        let conn = self.conn.lock();
        let rows = conn
            .prepare(&format!(
                "SELECT {} FROM feedback_requests WHERE request_id = ?1 ORDER BY rowid ASC",
                REQUEST_COLUMNS
            ))?
            .query_map(params![request_id], read_request_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let (parents, children): (Vec<_>, Vec<_>) =
            rows.into_iter().map(|(_, r)| r).partition(|r| r.parent_id.is_none());

        let parent = match <[FeedbackRequestRow; 1]>::try_from(parents) {
            Ok([parent]) => parent,
            Err(parents) => {
                return Err(DojoError::InvalidTask(format!(
                    "Expected only one validator request, found {}",
                    parents.len()
                )))
            }
        };

        let children: Vec<FeedbackRequestRow> = children
            .into_iter()
            .filter(|c| c.parent_id.as_deref() == Some(parent.id.as_str()))
            .collect();
        if children.is_empty() {
            return Err(DojoError::InvalidTask(format!(
                "Validator request {} must have child requests",
                parent.id
            )));
        }

        let request = map_stored_request(&load_stored(&conn, parent)?, false)?;
        let miner_responses = map_miner_rows(&conn, children)?;
        Ok(DendriteQueryResponse {
            request,
            miner_responses,
        })
    }

    /// Number of processed validator requests
    pub fn get_num_processed_tasks(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM feedback_requests WHERE is_processed = 1 AND parent_id IS NULL",
            [],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    /// Obfuscated model id -> real model id for a validator request
    pub fn get_real_model_ids(&self, request_id: &str) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock();
        let pairs = conn
            .prepare(
                "SELECT g.obfuscated_model_id, g.real_model_id
                 FROM ground_truths g
                 JOIN feedback_requests r ON r.id = g.feedback_request_id
                 WHERE r.request_id = ?1 AND r.parent_id IS NULL",
            )?
            .query_map(params![request_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(pairs)
    }
}

fn validator_filter(hotkeys: &[String]) -> String {
    format!(
        "parent_id IS NULL AND expire_at > ? AND LOWER(hotkey) IN ({})
         AND EXISTS (SELECT 1 FROM feedback_requests c WHERE c.parent_id = feedback_requests.id)",
        placeholders(hotkeys.len())
    )
}

fn count_validator_requests(
    conn: &Connection,
    hotkeys: &[String],
    now: i64,
    processed: bool,
) -> Result<usize> {
    if hotkeys.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "SELECT COUNT(*) FROM feedback_requests WHERE {} AND is_processed = ?",
        validator_filter(hotkeys)
    );
    let mut values: Vec<Value> = vec![Value::Integer(now)];
    values.extend(hotkeys.iter().cloned().map(Value::Text));
    values.push(Value::Integer(processed as i64));

    let count: i64 = conn.query_row(&sql, params_from_iter(values), |r| r.get(0))?;
    Ok(count as usize)
}

/// Iterator over batches of validator requests with their unprocessed miner
/// responses. Pages by row position so marking tasks processed between
/// batches does not skip any.
pub struct TaskBatches {
    conn: Arc<Mutex<Connection>>,
    hotkeys: Vec<String>,
    now: i64,
    batch_size: usize,
    remaining: usize,
    cursor: Option<i64>,
}

impl TaskBatches {
    /// Unprocessed validator requests counted when the batches were created
    pub fn total(&self) -> usize {
        self.remaining
    }

    fn next_batch(&mut self) -> Result<Vec<DendriteQueryResponse>> {
        let conn = self.conn.lock();

        let mut sql = format!(
            "SELECT {} FROM feedback_requests WHERE {} AND is_processed = 0",
            REQUEST_COLUMNS,
            validator_filter(&self.hotkeys)
        );
        let mut values: Vec<Value> = vec![Value::Integer(self.now)];
        values.extend(self.hotkeys.iter().cloned().map(Value::Text));
        if let Some(cursor) = self.cursor {
            sql.push_str(" AND rowid < ?");
            values.push(Value::Integer(cursor));
        }
        sql.push_str(" ORDER BY rowid DESC LIMIT ?");
        values.push(Value::Integer(self.batch_size as i64));

        let parents = conn
            .prepare(&sql)?
            .query_map(params_from_iter(values), read_request_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let Some((last_rowid, _)) = parents.last() else {
            return Ok(Vec::new());
        };
        self.cursor = Some(*last_rowid);

        let parent_ids: Vec<String> = parents.iter().map(|(_, p)| p.id.clone()).collect();
        let children = conn
            .prepare(&format!(
                "SELECT {} FROM feedback_requests
                 WHERE parent_id IN ({}) AND is_processed = 0 ORDER BY rowid DESC",
                REQUEST_COLUMNS,
                placeholders(parent_ids.len())
            ))?
            .query_map(params_from_iter(parent_ids.iter()), read_request_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut children_by_parent: HashMap<String, Vec<FeedbackRequestRow>> = HashMap::new();
        for (_, child) in children {
            if let Some(parent_id) = child.parent_id.clone() {
                children_by_parent.entry(parent_id).or_default().push(child);
            }
        }

        let mut batch = Vec::with_capacity(parents.len());
        for (_, parent) in parents {
            let children = children_by_parent.remove(&parent.id).unwrap_or_default();
            let request = map_stored_request(&load_stored(&conn, parent)?, false)?;
            let miner_responses = map_miner_rows(&conn, children)?;
            batch.push(DendriteQueryResponse {
                request,
                miner_responses,
            });
        }
        Ok(batch)
    }
}

impl Iterator for TaskBatches {
    type Item = Result<Vec<DendriteQueryResponse>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self.next_batch() {
            Ok(batch) if batch.is_empty() => {
                self.remaining = 0;
                None
            }
            Ok(batch) => {
                self.remaining = self.remaining.saturating_sub(batch.len());
                Some(Ok(batch))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}
