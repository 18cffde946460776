//! Webhook HTTP server.
//!
//! The request path does only cheap, synchronous work: signature check,
//! platform detection, event-type routing and payload validation. Accepted
//! push events are handed to the [`WorkQueue`](crate::queue::WorkQueue) and
//! answered with `202` before any fetching or analysis happens.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/webhook` | Receive a push delivery |
//! | `GET`  | `/events` | List stored events (`?repository=&limit=`) |
//! | `GET`  | `/events/{owner}/{repo}/{sha}` | One stored event with its analysis |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Webhook responses
//!
//! | Situation | Status | Body `status` / error `code` |
//! |-----------|--------|------------------------------|
//! | `ping` event | 200 | `pong` |
//! | other non-`push` event | 202 | `ignored` |
//! | accepted push | 202 | `queued` |
//! | missing / malformed signature header | 401 | `unauthenticated` |
//! | signature mismatch | 401 | `invalid_signature` |
//! | unsupported platform | 400 | `unsupported_platform` |
//! | malformed payload | 400 | `invalid_payload` |
//! | queue full or closed | 503 | `queue_unavailable` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_payload", "message": "invalid payload: missing or malformed field `pusher.name`" } }
//! ```

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::error::PipelineError;
use crate::get::{get_event, EventDetail};
use crate::migrate::apply_schema;
use crate::object_store::{ObjectStore, S3ObjectStore};
use crate::payload::{parse_payload, Platform};
use crate::pipeline::{Pipeline, PushEvent};
use crate::queue::{spawn_worker, QueueError, WorkQueue};
use crate::signature::{verify_signature, SIGNATURE_HEADER};
use crate::storage::offload_key;
use crate::store::{EventFilter, EventStore, EventSummary, SqliteEventStore};

/// GitHub caps webhook payloads at 25 MB.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Shared state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    secret: Arc<Vec<u8>>,
    queue: WorkQueue,
    store: Arc<dyn EventStore>,
    presigner: Option<(Arc<dyn ObjectStore>, Duration)>,
}

impl AppState {
    pub fn new(secret: impl Into<Vec<u8>>, queue: WorkQueue, store: Arc<dyn EventStore>) -> Self {
        Self {
            secret: Arc::new(secret.into()),
            queue,
            store,
            presigner: None,
        }
    }

    /// Attach presigned download links for offloaded diffs to event lookups.
    pub fn with_presigner(mut self, object_store: Arc<dyn ObjectStore>, ttl: Duration) -> Self {
        self.presigner = Some((object_store, ttl));
        self
    }
}

/// Starts the webhook server and its background worker.
///
/// Binds to `[server].bind`, creates the schema if needed, and runs until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let secret = config
        .webhook_secret()
        .context("webhook secret not configured (set [webhook].secret or PUSHLENS_WEBHOOK_SECRET)")?;

    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(pool));

    let pipeline = Arc::new(Pipeline::from_config(config, store.clone())?);
    let (queue, _worker) = spawn_worker(pipeline, config.webhook.queue_capacity);

    let mut state = AppState::new(secret, queue, store);
    if let Some(os) = &config.object_store {
        let presigner = S3ObjectStore::from_config(os).context("Failed to configure object store")?;
        state = state.with_presigner(Arc::new(presigner), Duration::from_secs(os.presign_ttl_secs));
    }
    let app = router(state);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    tracing::info!(
        bind = %bind_addr,
        fetch_commits = config.github.fetch_commits,
        object_store = config.object_store.is_some(),
        "webhook server listening"
    );
    println!("pushlens listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/events", get(handle_list_events))
        .route("/events/{owner}/{repo}/{sha}", get(handle_get_event))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"invalid_signature"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let (status, code) = match &err {
            PipelineError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            PipelineError::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature"),
            PipelineError::InvalidPayload { .. } => (StatusCode::BAD_REQUEST, "invalid_payload"),
            PipelineError::UnsupportedPlatform(_) => {
                (StatusCode::BAD_REQUEST, "unsupported_platform")
            }
            PipelineError::NoChanges | PipelineError::MissingCommitIdentity => {
                (StatusCode::UNPROCESSABLE_ENTITY, "unprocessable")
            }
            PipelineError::UpstreamFetchFailed(_) => (StatusCode::BAD_GATEWAY, "upstream"),
            PipelineError::AnalysisAborted(_) | PipelineError::StorageFailure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        AppError::new(status, code, err.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        AppError::new(StatusCode::SERVICE_UNAVAILABLE, "queue_unavailable", err.to_string())
    }
}

// ============ POST /webhook ============

#[derive(Debug, Serialize)]
struct WebhookResponse {
    status: &'static str,
    event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    commits: Option<usize>,
}

async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookResponse>), AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Err(err) = verify_signature(&state.secret, &body, signature) {
        tracing::warn!(error = %err, "webhook rejected");
        return Err(err.into());
    }

    let platform = Platform::detect(&headers)?;
    let event_type = platform.event_type(&headers).unwrap_or_default();

    match event_type.as_str() {
        "ping" => {
            return Ok((
                StatusCode::OK,
                Json(WebhookResponse {
                    status: "pong",
                    event: event_type,
                    repository: None,
                    commits: None,
                }),
            ));
        }
        "push" => {}
        _ => {
            tracing::debug!(event = %event_type, "ignoring non-push event");
            return Ok((
                StatusCode::ACCEPTED,
                Json(WebhookResponse {
                    status: "ignored",
                    event: event_type,
                    repository: None,
                    commits: None,
                }),
            ));
        }
    }

    let event = PushEvent::from_body(platform, &event_type, &body)?;
    let push = parse_payload(platform, &event.payload)?;

    state.queue.enqueue(event)?;

    tracing::info!(
        repository = %push.repository,
        commits = push.commits.len(),
        "push queued"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookResponse {
            status: "queued",
            event: event_type,
            repository: Some(push.repository),
            commits: Some(push.commits.len()),
        }),
    ))
}

// ============ GET /events ============

#[derive(Debug, Deserialize)]
struct ListQuery {
    repository: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ListResponse {
    events: Vec<EventSummary>,
}

async fn handle_list_events(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError> {
    let filter = EventFilter {
        repository: query.repository.filter(|r| !r.is_empty()),
        limit: query.limit,
    };
    let events = state.store.list_events(&filter).await?;
    Ok(Json(ListResponse { events }))
}

// ============ GET /events/{owner}/{repo}/{sha} ============

async fn handle_get_event(
    State(state): State<AppState>,
    Path((owner, repo, sha)): Path<(String, String, String)>,
) -> Result<Json<EventDetail>, AppError> {
    let repository = format!("{}/{}", owner, repo);
    let mut detail = get_event(state.store.as_ref(), &repository, &sha)
        .await?
        .ok_or_else(|| {
            AppError::new(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("event not found: {}@{}", repository, sha),
            )
        })?;

    if detail.diff_url.is_some() {
        if let Some((object_store, ttl)) = &state.presigner {
            detail.diff_download_url =
                object_store.presigned_url(&offload_key(&repository, &sha), *ttl);
        }
    }

    Ok(Json(detail))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let e: AppError = PipelineError::InvalidSignature.into();
        assert_eq!(e.status, StatusCode::UNAUTHORIZED);
        assert_eq!(e.code, "invalid_signature");

        let e: AppError = PipelineError::invalid_payload("pusher.name").into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        assert!(e.message.contains("pusher.name"));

        let e: AppError = PipelineError::UnsupportedPlatform("gitlab".into()).into();
        assert_eq!(e.code, "unsupported_platform");

        let e: AppError = QueueError::Full.into();
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
