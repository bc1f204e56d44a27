//! External task gateway
//!
//! HTTP intake for tasks created outside the validator's own generators.
//!
//! Endpoints:
//! - `POST /api/threed_gen/` - multipart `task_data` (JSON) plus optional `files`
//! - `GET /health` - liveness

use async_trait::async_trait;
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::protocol::{set_expire_time, FeedbackRequest, TerminalInfo};
use crate::storage::{TaskStore, TASK_DEADLINE_SECS};

/// Upper bound on a multipart upload
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// A file attached to an external task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Whatever takes an accepted external task further
#[async_trait]
pub trait TaskSubmitter: Send + Sync {
    async fn submit(&self, request: FeedbackRequest, files: Vec<UploadedFile>) -> Result<Value>;
}

/// Stores external tasks as validator requests
pub struct StorageSubmitter {
    store: TaskStore,
    validator_hotkey: String,
}

impl StorageSubmitter {
    pub fn new(store: TaskStore, validator_hotkey: impl Into<String>) -> Self {
        Self {
            store,
            validator_hotkey: validator_hotkey.into(),
        }
    }
}

#[async_trait]
impl TaskSubmitter for StorageSubmitter {
    async fn submit(&self, mut request: FeedbackRequest, files: Vec<UploadedFile>) -> Result<Value> {
        request.dendrite = Some(TerminalInfo::with_hotkey(&self.validator_hotkey));
        if request.expire_at.is_none() {
            request.expire_at = Some(set_expire_time(TASK_DEADLINE_SECS));
        }

        let id = self.store.save_validator_request(&request)?;
        info!(
            "Stored external request {} ({} files attached)",
            request.request_id,
            files.len()
        );
        Ok(json!({
            "id": id,
            "request_id": request.request_id,
            "expire_at": request.expire_at,
        }))
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

pub struct GatewayState {
    pub submitter: Arc<dyn TaskSubmitter>,
}

type ApiError = (StatusCode, Json<Value>);

fn reject(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "message": message.into() })))
}

/// Null, false, zero and empty values all count as an empty body
fn is_empty_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Keep only the file name of file-style completions
fn strip_file_completions(data: &mut Value) -> std::result::Result<(), &'static str> {
    let object = data.as_object_mut().ok_or("task_data must be an object")?;
    let mut responses = object
        .remove("responses")
        .or_else(|| object.remove("completion_responses"))
        .ok_or("missing responses")?;

    let list = responses.as_array_mut().ok_or("responses must be a list")?;
    for response in list.iter_mut() {
        let completion = response
            .get_mut("completion")
            .ok_or("response without completion")?;
        if let Some(filename) = completion.get("filename").cloned() {
            *completion = json!({ "filename": filename });
        }
    }

    object.insert("completion_responses".to_string(), responses);
    Ok(())
}

async fn read_multipart(
    multipart: &mut Multipart,
) -> std::result::Result<(Option<String>, Vec<UploadedFile>), MultipartError> {
    let mut task_data = None;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("task_data") => task_data = Some(field.text().await?),
            Some("files") => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await?.to_vec();
                files.push(UploadedFile {
                    filename,
                    content_type,
                    data,
                });
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    Ok((task_data, files))
}

pub async fn create_threed_gen_task(
    State(state): State<Arc<GatewayState>>,
    mut multipart: Multipart,
) -> std::result::Result<Json<Value>, ApiError> {
    let (task_data, files) = read_multipart(&mut multipart).await.map_err(|e| {
        error!("Unreadable multipart body: {}", e);
        reject(StatusCode::BAD_REQUEST, "Invalid request data")
    })?;
    let Some(task_data) = task_data else {
        error!("Missing task_data field");
        return Err(reject(StatusCode::BAD_REQUEST, "Invalid request data"));
    };

    let mut data: Value = serde_json::from_str(&task_data).map_err(|_| {
        error!("Invalid JSON in request body");
        reject(StatusCode::BAD_REQUEST, "Invalid JSON in request body")
    })?;
    if is_empty_json(&data) {
        error!("Empty request body");
        return Err(reject(StatusCode::BAD_REQUEST, "Request body is empty"));
    }

    strip_file_completions(&mut data).map_err(|e| {
        error!("Invalid data sent by external user: {}", e);
        reject(StatusCode::BAD_REQUEST, "Invalid request data")
    })?;

    info!("Received task data from external user");
    debug!("Task data: {}", data);

    let request: FeedbackRequest = serde_json::from_value(data).map_err(|e| {
        error!("Validation error: {}", e);
        reject(
            StatusCode::BAD_REQUEST,
            format!("Invalid request data: {}", e),
        )
    })?;

    match state.submitter.submit(request, files).await {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            error!("Encountered exception: {}", e);
            Err(reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
            ))
        }
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}

// ============================================================================
// SERVER
// ============================================================================

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/threed_gen/", post(create_threed_gen_task))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn serve(submitter: Arc<dyn TaskSubmitter>, host: &str, port: u16) -> anyhow::Result<()> {
    let app = router(Arc::new(GatewayState { submitter }));

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Task gateway listening on {}", addr);
    info!("  GET  /health            - Health check");
    info!("  POST /api/threed_gen/   - Submit external task");

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DojoError;
    use axum::body::Body;
    use axum::http::Request;
    use parking_lot::Mutex;
    use tower::ServiceExt;

    const BOUNDARY: &str = "dojo-test-boundary";

    #[derive(Default)]
    struct Capture {
        requests: Mutex<Vec<(FeedbackRequest, usize)>>,
        fail: bool,
    }

    #[async_trait]
    impl TaskSubmitter for Capture {
        async fn submit(&self, request: FeedbackRequest, files: Vec<UploadedFile>) -> Result<Value> {
            if self.fail {
                return Err(DojoError::Other("validator unavailable".to_string()));
            }
            let id = request.request_id.clone();
            self.requests.lock().push((request, files.len()));
            Ok(json!({ "request_id": id }))
        }
    }

    fn multipart_body(task_data: &str, files: &[(&str, &str)]) -> Body {
        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"task_data\"\r\n\r\n{task_data}\r\n",
            b = BOUNDARY
        );
        for (name, content) in files {
            body.push_str(&format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n{content}\r\n",
                b = BOUNDARY
            ));
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));
        Body::from(body)
    }

    async fn post(app: Router, body: Body) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/threed_gen/")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={}", BOUNDARY),
                    )
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn app(capture: Arc<Capture>) -> Router {
        router(Arc::new(GatewayState { submitter: capture }))
    }

    fn task_json() -> String {
        json!({
            "task_type": "TEXT_TO_THREE_D",
            "prompt": "a red chair",
            "responses": [
                {"model": "m1", "completion": {"filename": "chair.ply", "url": "s3://x"}},
                {"model": "m2", "completion": {"filename": "chair2.ply"}}
            ]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(Arc::default())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn test_accepts_task_and_strips_completions() {
        let capture = Arc::new(Capture::default());
        let (status, body) = post(
            app(capture.clone()),
            multipart_body(&task_json(), &[("chair.ply", "ply data")]),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let requests = capture.requests.lock();
        let (request, files) = &requests[0];
        assert_eq!(body["request_id"], json!(request.request_id));
        assert_eq!(*files, 1);
        assert_eq!(request.completion_responses.len(), 2);
        let first = serde_json::to_value(&request.completion_responses[0].completion).unwrap();
        assert_eq!(first, json!({"filename": "chair.ply"}));
    }

    #[tokio::test]
    async fn test_rejections() {
        let cases = [
            ("{}", "Request body is empty"),
            ("null", "Request body is empty"),
            ("{not json", "Invalid JSON in request body"),
            (r#"{"prompt": "x"}"#, "Invalid request data"),
        ];
        for (data, message) in cases {
            let (status, body) = post(app(Arc::default()), multipart_body(data, &[])).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", data);
            assert_eq!(body["message"], json!(message), "{}", data);
        }

        let invalid = json!({"prompt": "x", "responses": []}).to_string();
        let (status, body) = post(app(Arc::default()), multipart_body(&invalid, &[])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request data: "));
    }

    #[tokio::test]
    async fn test_submitter_failure_is_500() {
        let capture = Arc::new(Capture {
            fail: true,
            ..Default::default()
        });
        let (status, body) = post(app(capture), multipart_body(&task_json(), &[])).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], json!("Internal server error"));
    }

    #[tokio::test]
    async fn test_storage_submitter_persists_request() {
        let store = TaskStore::in_memory().unwrap();
        let submitter = StorageSubmitter::new(store.clone(), "5Vali");
        let request: FeedbackRequest = serde_json::from_value(json!({
            "task_type": "CODE_GENERATION",
            "prompt": "p",
            "completion_responses": [{"model": "m", "completion": {"files": []}}]
        }))
        .unwrap();

        let response = submitter.submit(request.clone(), Vec::new()).await.unwrap();
        assert_eq!(response["request_id"], json!(request.request_id));

        // a task is only loadable once a miner answered
        let mut answer = request.clone();
        answer.axon = Some(TerminalInfo::with_hotkey("5Miner"));
        answer.dojo_task_id = Some("dojo-1".to_string());
        store
            .save_miner_response(
                response["id"].as_str().unwrap(),
                &answer,
                chrono::Utc::now() + chrono::Duration::hours(1),
            )
            .unwrap();

        let stored = store.get_task_by_request_id(&request.request_id).unwrap();
        assert_eq!(stored.request.validator_hotkey(), Some("5Vali"));
        assert!(stored.request.expire_at.is_some());
    }
}
