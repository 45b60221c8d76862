//! HTTP surface of the gateway.
//!
//! The server accepts events, acknowledges them quickly, and exposes the
//! status and manual-trigger endpoints for the background pipeline.
//!
//! # Endpoints
//!
//! - `POST /events` — standard or legacy-TSV event submission
//! - `POST /ingest` — single-event ingest with webhook forwarding
//! - `GET /health` — full status snapshot
//! - `GET /store/recent`, `GET /sync/status`, `POST /sync/run`
//! - `GET /fallback/status`, `GET /fallback/tail?n=`
//! - `GET /replay/status`, `POST /replay/run`
//!
//! Every response is JSON, including 404s and body-parse / size errors.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub mod events;
pub mod ingest;
pub mod status;

use axum::Json;
use axum::body::Bytes;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::{DefaultBodyLimit, FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::dedupe::DuplicateWindow;
use crate::queue::ForwardQueue;
use crate::sink::sheets::SheetsClient;
use crate::sink::webhook::GasWebhookClient;
use crate::sink::{BatchSink, WebhookSink};
use crate::spool::SpoolWriter;
use crate::store::SummaryRing;
use crate::worker::{ReplayWorker, SyncWorker};

pub use events::events_handler;
pub use ingest::ingest_handler;

/// Shared application state, passed to handlers via the `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Arc<Config>,
    dedupe: Mutex<DuplicateWindow>,
    ring: Mutex<SummaryRing>,
    queue: Arc<Mutex<ForwardQueue>>,
    spool: Arc<SpoolWriter>,
    webhook: Arc<dyn WebhookSink>,
    sync_worker: Arc<SyncWorker>,
    replay_worker: Arc<ReplayWorker>,
    received: AtomicU64,
    dropped_duplicates: AtomicU64,
    started_at: Instant,
}

impl AppState {
    /// Builds the state with the real sink clients.
    pub fn new(config: Config) -> Self {
        let webhook: Arc<dyn WebhookSink> = Arc::new(GasWebhookClient::new(&config.webhook));
        let batch: Arc<dyn BatchSink> = Arc::new(SheetsClient::new(&config.sheets));
        AppState::with_sinks(config, webhook, batch)
    }

    /// Builds the state with injected sinks; tests script the sinks.
    pub fn with_sinks(
        config: Config,
        webhook: Arc<dyn WebhookSink>,
        batch: Arc<dyn BatchSink>,
    ) -> Self {
        let config = Arc::new(config);
        let queue = Arc::new(Mutex::new(ForwardQueue::new(config.queue.limit)));
        let spool = Arc::new(SpoolWriter::new(config.spool.path(), config.spool.max_bytes));
        let sync_worker = Arc::new(SyncWorker::new(
            queue.clone(),
            batch,
            config.queue.clone(),
            config.sync_worker_armed(),
        ));
        let replay_worker = Arc::new(ReplayWorker::new(config.clone(), webhook.clone()));

        AppState {
            inner: Arc::new(AppStateInner {
                dedupe: Mutex::new(DuplicateWindow::new(config.dedupe_window_ms)),
                ring: Mutex::new(SummaryRing::new(config.store_limit)),
                queue,
                spool,
                webhook,
                sync_worker,
                replay_worker,
                received: AtomicU64::new(0),
                dropped_duplicates: AtomicU64::new(0),
                started_at: Instant::now(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn dedupe(&self) -> &Mutex<DuplicateWindow> {
        &self.inner.dedupe
    }

    pub fn ring(&self) -> &Mutex<SummaryRing> {
        &self.inner.ring
    }

    pub fn queue(&self) -> &Arc<Mutex<ForwardQueue>> {
        &self.inner.queue
    }

    pub fn spool(&self) -> &SpoolWriter {
        &self.inner.spool
    }

    pub fn webhook(&self) -> &Arc<dyn WebhookSink> {
        &self.inner.webhook
    }

    pub fn sync_worker(&self) -> &Arc<SyncWorker> {
        &self.inner.sync_worker
    }

    pub fn replay_worker(&self) -> &Arc<ReplayWorker> {
        &self.inner.replay_worker
    }

    pub fn add_received(&self, n: u64) {
        self.inner.received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn received(&self) -> u64 {
        self.inner.received.load(Ordering::Relaxed)
    }

    pub fn add_dropped_duplicates(&self, n: u64) {
        self.inner.dropped_duplicates.fetch_add(n, Ordering::Relaxed);
    }

    pub fn dropped_duplicates(&self) -> u64 {
        self.inner.dropped_duplicates.load(Ordering::Relaxed)
    }

    pub fn uptime_ms(&self) -> u64 {
        self.inner.started_at.elapsed().as_millis() as u64
    }

    /// Spawns whichever background workers the mode machine armed.
    /// Returns the number of workers started.
    pub fn spawn_workers(&self, shutdown: &CancellationToken) -> usize {
        let mut started = 0;

        if self.config().sync_worker_armed() {
            tokio::spawn(self.inner.sync_worker.clone().run(shutdown.clone()));
            started += 1;
        }
        if self.config().replay_armed() {
            tokio::spawn(self.inner.replay_worker.clone().run(shutdown.clone()));
            started += 1;
        }

        started
    }
}

/// Handler-visible failures, rendered as the JSON error envelope.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Recognisable JSON, unrecognisable shape or missing fields.
    #[error("{0}")]
    BadRequest(String),

    /// Body that could not be parsed at all.
    #[error("{0}")]
    InvalidRequest(String),

    /// Body over the configured size limit.
    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "ok": false, "error": self.code() });
        match &self {
            ApiError::NotFound => {}
            other => {
                body["detail"] = json!(other.to_string());
            }
        }
        (self.status(), Json(body)).into_response()
    }
}

/// Raw JSON body extractor.
///
/// Keeps both the parsed value and the original bytes so handlers can
/// fingerprint and enqueue the canonical body without re-reading. Size
/// violations become 413 `PAYLOAD_TOO_LARGE`; unparseable bodies become
/// 400 `INVALID_REQUEST`.
pub struct JsonBody {
    pub value: Value,
    pub raw: Bytes,
}

impl<S> FromRequest<S> for JsonBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let raw = Bytes::from_request(req, state).await.map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ApiError::PayloadTooLarge(rejection.body_text())
            } else {
                ApiError::InvalidRequest(rejection.body_text())
            }
        })?;

        let value = serde_json::from_slice(&raw)
            .map_err(|e| ApiError::InvalidRequest(format!("body is not valid JSON: {}", e)))?;

        Ok(JsonBody { value, raw })
    }
}

/// Client metadata captured for packed payloads.
///
/// `ip` is the first comma-split token of `X-Forwarded-For` when present,
/// else the socket peer address, else `"unknown"` (connect info is absent in
/// router-level tests).
pub struct ClientMeta {
    pub ip: String,
    pub ua: String,
}

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded_ip = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let ip = forwarded_ip
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|info| info.0.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());

        let ua = parts
            .headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(ClientMeta { ip, ua })
    }
}

/// JSON 404 for unknown routes.
async fn not_found_handler() -> ApiError {
    ApiError::NotFound
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    let body_limit = app_state.config().json_limit_bytes;

    axum::Router::new()
        .route("/events", post(events_handler))
        .route("/ingest", post(ingest_handler))
        .route("/health", get(status::health_handler))
        .route("/store/recent", get(status::store_recent_handler))
        .route("/sync/status", get(status::sync_status_handler))
        .route("/sync/run", post(status::sync_run_handler))
        .route("/fallback/status", get(status::fallback_status_handler))
        .route("/fallback/tail", get(status::fallback_tail_handler))
        .route("/replay/status", get(status::replay_status_handler))
        .route("/replay/run", post(status::replay_run_handler))
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(app_state)
}
