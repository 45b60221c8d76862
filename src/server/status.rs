//! Status and control endpoints.
//!
//! All of these are read-only snapshots except the manual worker triggers,
//! which run one tick through the same single-flight flags as the timers.
//! `/health` must stay side-effect-free: it stats the spool file and loads
//! the replay state read-only, nothing else.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiError, AppState};
use crate::spool::reader::tail_lines;

pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let config = state.config();

    let (spool_bytes, spool_updated_at) = state.spool().stat().unwrap_or((0, None));
    let queue_stats = state.queue().lock().expect("queue mutex poisoned").stats();
    let stored = state.ring().lock().expect("ring mutex poisoned").len();
    let dedupe_entries = state.dedupe().lock().expect("dedupe mutex poisoned").len();
    let replay_state = state.replay_worker().state();

    Json(json!({
        "ok": true,
        "uptime_ms": state.uptime_ms(),
        "mode": {
            "ops_mode": config.ops_mode.as_str(),
            "external_sync": config.external_sync,
            "jsonl_always": config.spool.always,
            "jsonl_fallback": config.spool.fallback,
            "replay_enabled": config.replay.enabled,
        },
        "received": state.received(),
        "dropped_duplicates": state.dropped_duplicates(),
        "dedupe": {
            "window_ms": config.dedupe_window_ms,
            "entries": dedupe_entries,
        },
        "store": {
            "stored": stored,
            "limit": config.store_limit,
        },
        "queue": queue_stats,
        "workers": {
            "sync_armed": state.sync_worker().armed(),
            "sync_ticks": state.sync_worker().ticks(),
            "replay_armed": config.replay_armed(),
            "replay_ticks": state.replay_worker().ticks(),
        },
        "jsonl": {
            "path": state.spool().path().display().to_string(),
            "bytes": spool_bytes,
            "updated_at": spool_updated_at.map(|t| t.to_rfc3339()),
        },
        "replay": replay_state,
    }))
}

pub async fn store_recent_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    if !state.config().store_enabled() {
        return Err(ApiError::NotFound);
    }

    let ring = state.ring().lock().expect("ring mutex poisoned");
    Ok(Json(json!({
        "ok": true,
        "mode": state.config().ops_mode.as_str(),
        "stored": ring.len(),
        "recent": ring.tail(20),
    })))
}

pub async fn sync_status_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let config = state.config();
    if !config.forwarding_enabled() {
        return Err(ApiError::NotFound);
    }

    let stats = state.queue().lock().expect("queue mutex poisoned").stats();
    Ok(Json(json!({
        "ok": true,
        "external": config.external_sync,
        "queue": stats,
        "worker": {
            "armed": state.sync_worker().armed(),
            "interval_ms": config.queue.worker_interval.as_millis() as u64,
            "batch_size": config.queue.batch_size,
            "max_retry": config.queue.max_retry,
            "backoff_base_ms": config.queue.backoff_base_ms,
            "ticks": state.sync_worker().ticks(),
        },
    })))
}

pub async fn sync_run_handler(State(state): State<AppState>) -> Json<Value> {
    let report = state.sync_worker().tick_once().await;
    Json(json!(report))
}

pub async fn fallback_status_handler(State(state): State<AppState>) -> Json<Value> {
    let (bytes, updated_at) = state.spool().stat().unwrap_or((0, None));
    Json(json!({
        "ok": true,
        "path": state.spool().path().display().to_string(),
        "bytes": bytes,
        "updated_at": updated_at.map(|t| t.to_rfc3339()),
    }))
}

#[derive(Debug, Deserialize)]
pub struct TailParams {
    n: Option<usize>,
}

pub async fn fallback_tail_handler(
    State(state): State<AppState>,
    Query(params): Query<TailParams>,
) -> Json<Value> {
    let n = params.n.unwrap_or(50).clamp(1, 500);
    let config = state.config();

    let lines = match tail_lines(state.spool().path(), n, config.spool.tail_max_bytes) {
        Ok(lines) => lines,
        Err(_) => Vec::new(),
    };

    Json(json!({
        "ok": true,
        "n": n,
        "lines": lines,
    }))
}

pub async fn replay_status_handler(State(state): State<AppState>) -> Json<Value> {
    let config = state.config();
    let replay_state = state.replay_worker().state();

    Json(json!({
        "ok": true,
        "replay_enabled": config.replay.enabled,
        "armed": config.replay_armed(),
        "mode": config.replay.mode,
        "stats": {
            "ticks": state.replay_worker().ticks(),
            "sent": replay_state.sent,
            "failed": replay_state.failed,
        },
        "state": replay_state,
        "jsonl": {
            "path": state.spool().path().display().to_string(),
        },
    }))
}

pub async fn replay_run_handler(State(state): State<AppState>) -> Json<Value> {
    let report = state.replay_worker().tick_once().await;
    Json(json!(report))
}
