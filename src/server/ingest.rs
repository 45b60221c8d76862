//! `POST /ingest` — single-event ingest with synchronous webhook forwarding.
//!
//! A valid body is always a 200: the webhook attempt happens inline, but its
//! failure is absorbed — recorded in logs and, when the fallback toggle is
//! on, as a `jsonl.fallback` spool record carrying the failure reason. The
//! `jsonl.always` toggle spools every accepted event before the webhook is
//! even tried. Only an unexpected exception surfaces as a 500.

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{ApiError, AppState, JsonBody};
use crate::types::{JobId, SpoolRecord, SpoolStage, TraceId, now_iso, now_ms};

#[derive(Debug, Deserialize)]
struct IngestRequest {
    source: Option<String>,
    event_type: Option<String>,
    payload: Option<Value>,
}

fn require(field: Option<String>, name: &str) -> Result<String, ApiError> {
    field
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("missing required field: {}", name)))
}

pub async fn ingest_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: JsonBody,
) -> Result<Json<Value>, ApiError> {
    let started = Instant::now();
    let config = state.config();

    let request: IngestRequest = serde_json::from_value(body.value.clone())
        .map_err(|e| ApiError::BadRequest(format!("unrecognised request shape: {}", e)))?;

    let source = require(request.source, "source")?;
    let event_type = require(request.event_type, "event_type")?;
    let payload = request
        .payload
        .ok_or_else(|| ApiError::BadRequest("missing required field: payload".to_string()))?;

    let job_id = JobId::mint();
    let trace_id = TraceId::from_header_or_new(
        headers
            .get("x-request-id")
            .and_then(|value| value.to_str().ok()),
    );
    let received_at = now_iso();

    state.add_received(1);

    // The job id is this request's fingerprint; freshly minted, it can never
    // collide inside the window, so recording it is bookkeeping only.
    if config.dedupe_enabled() {
        state
            .dedupe()
            .lock()
            .expect("dedupe mutex poisoned")
            .check_and_record(job_id.as_str(), now_ms());
    }

    if config.forwarding_enabled() {
        let event_body = json!({
            "job_id": job_id.as_str(),
            "trace_id": trace_id.as_str(),
            "source": source,
            "event_type": event_type,
            "payload": payload,
            "received_at": received_at,
        });

        if config.spool_enabled() && config.spool.always {
            let record = spool_record(
                SpoolStage::Always,
                None,
                &job_id,
                &trace_id,
                &source,
                &event_type,
                &payload,
                &received_at,
                started,
            );
            if let Err(e) = state.spool().append(&record).await {
                warn!(job_id = %job_id, error = %e, "Always-on spool write failed");
            }
        }

        let outcome = state.webhook().post(&event_body).await;

        if outcome.ok {
            debug!(
                job_id = %job_id,
                latency_ms = outcome.latency_ms,
                "Webhook delivery succeeded"
            );
        } else {
            let reason = outcome.summary();
            warn!(job_id = %job_id, error = %reason, "Webhook delivery failed");

            if config.spool_enabled() && config.spool.fallback {
                let record = spool_record(
                    SpoolStage::Fallback,
                    Some(reason),
                    &job_id,
                    &trace_id,
                    &source,
                    &event_type,
                    &payload,
                    &received_at,
                    started,
                );
                if let Err(e) = state.spool().append(&record).await {
                    warn!(job_id = %job_id, error = %e, "Fallback spool write failed");
                }
            }
        }
    }

    let latency_ms = started.elapsed().as_millis() as u64;

    Ok(Json(json!({
        "ok": true,
        "job_id": job_id.as_str(),
        "trace_id": trace_id.as_str(),
        "received_at": received_at,
        "latency_ms": latency_ms,
        "mode": config.ops_mode.as_str(),
    })))
}

#[allow(clippy::too_many_arguments)]
fn spool_record(
    stage: SpoolStage,
    reason: Option<String>,
    job_id: &JobId,
    trace_id: &TraceId,
    source: &str,
    event_type: &str,
    payload: &Value,
    received_at: &str,
    started: Instant,
) -> SpoolRecord {
    SpoolRecord {
        ts: now_iso(),
        kind: "ingest".to_string(),
        stage,
        reason,
        job_id: job_id.as_str().to_string(),
        trace_id: trace_id.as_str().to_string(),
        source: source.to_string(),
        event_type: event_type.to_string(),
        payload: payload.clone(),
        received_at: received_at.to_string(),
        ingest_latency_ms: started.elapsed().as_millis() as u64,
    }
}
