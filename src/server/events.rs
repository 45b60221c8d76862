//! `POST /events` — batched event submission.
//!
//! Accepts the standard `{events: [...]}` shape and the legacy TSV shape
//! `{action: "append_events_tsv", lines: [...]}`. Events are deduplicated
//! against the short window, summarised into the ring, and (in FULL mode)
//! enqueued for the batch sink as one queue item per accepted event, each
//! carrying its packed payload. The dedup and enqueue paths are synchronous;
//! the handler never waits on a sink.

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};
use tracing::debug;

use super::{ApiError, AppState, ClientMeta, JsonBody};
use crate::types::{
    EventId, EventsRequest, Fingerprint, IncomingEvent, PackedMeta, PackedPayload, QueueItem,
    SummaryRecord, now_iso, now_ms,
};

/// One accepted event, packed and ready to enqueue.
struct AcceptedRow {
    id: EventId,
    packed: PackedPayload,
}

/// Packs a standard-shape event with its resolved defaults.
fn pack_standard_event(
    event: IncomingEvent,
    default_source: Option<&str>,
    default_user: Option<&str>,
    raw: Option<Value>,
    meta: &ClientMeta,
) -> (EventId, PackedPayload) {
    let source = event
        .source
        .or_else(|| default_source.map(String::from))
        .unwrap_or_else(|| "unknown".to_string());
    let user_id = event
        .user_id
        .or_else(|| default_user.map(String::from))
        .unwrap_or_else(|| "anonymous".to_string());
    let event_type = event.event_type.unwrap_or_else(|| "unknown".to_string());

    let id = match event.event_id.filter(|id| !id.is_empty()) {
        Some(id) => EventId::new(id),
        None => EventId::synthesize(&source, &user_id),
    };

    let packed = PackedPayload {
        v: 1,
        event_type,
        occurred_at: event.occurred_at,
        meta: PackedMeta {
            source,
            user_id,
            ip: meta.ip.clone(),
            ua: meta.ua.clone(),
        },
        data: event.payload.unwrap_or_else(|| json!({})),
        raw,
    };

    (id, packed)
}

/// Packs one legacy TSV line: the first tab splits id from payload; a
/// payload that is not JSON is kept as `{raw_line: <line>}`.
fn pack_tsv_line(line: &str, source: &str, user_id: &str, meta: &ClientMeta) -> (EventId, PackedPayload) {
    let (id_part, payload_part) = match line.split_once('\t') {
        Some((id, rest)) => (id.trim(), rest),
        None => (line.trim(), ""),
    };

    let id = if id_part.is_empty() {
        EventId::synthesize(source, user_id)
    } else {
        EventId::new(id_part)
    };

    let data = serde_json::from_str::<Value>(payload_part)
        .unwrap_or_else(|_| json!({ "raw_line": line }));

    let packed = PackedPayload {
        v: 1,
        event_type: "legacy.tsv".to_string(),
        occurred_at: None,
        meta: PackedMeta {
            source: source.to_string(),
            user_id: user_id.to_string(),
            ip: meta.ip.clone(),
            ua: meta.ua.clone(),
        },
        data,
        raw: Some(json!(line)),
    };

    (id, packed)
}

pub async fn events_handler(
    State(state): State<AppState>,
    meta: ClientMeta,
    body: JsonBody,
) -> Result<Json<Value>, ApiError> {
    let started = Instant::now();
    let config = state.config();

    let request: EventsRequest = serde_json::from_value(body.value.clone())
        .map_err(|e| ApiError::BadRequest(format!("unrecognised request shape: {}", e)))?;

    // Canonical form: re-serialised JSON, independent of client whitespace.
    let canonical = body.value.to_string();
    let request_fp = Fingerprint::of_body(&canonical);
    let now = now_ms();

    let received;
    let mut dropped_duplicates = 0usize;
    let mut rows: Vec<AcceptedRow> = Vec::new();
    let duplicate;

    match request {
        EventsRequest::Standard {
            events,
            source,
            user_id,
        } => {
            received = events.len();

            // Request-level fingerprint: the SHA-256 of the canonical body.
            // A duplicate request drops all of its events.
            let request_dup = config.dedupe_enabled()
                && state
                    .dedupe()
                    .lock()
                    .expect("dedupe mutex poisoned")
                    .check_and_record(request_fp.as_str(), now);
            duplicate = request_dup;

            let raw_events: Vec<Value> = body
                .value
                .get("events")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for (index, event) in events.into_iter().enumerate() {
                if request_dup {
                    dropped_duplicates += 1;
                    continue;
                }

                let supplied_id = event.event_id.clone().filter(|id| !id.is_empty());
                let (id, packed) = pack_standard_event(
                    event,
                    source.as_deref(),
                    user_id.as_deref(),
                    raw_events.get(index).cloned(),
                    &meta,
                );

                // Client-supplied ids are deduped individually as well, so a
                // known event resubmitted inside a fresh body is still
                // suppressed. Synthesised ids are unique by construction.
                if supplied_id.is_some()
                    && config.dedupe_enabled()
                    && state
                        .dedupe()
                        .lock()
                        .expect("dedupe mutex poisoned")
                        .check_and_record(id.as_str(), now)
                {
                    dropped_duplicates += 1;
                    continue;
                }

                rows.push(AcceptedRow { id, packed });
            }
        }

        EventsRequest::LegacyTsv {
            lines,
            source,
            user_id,
            ..
        } => {
            received = lines.len();
            let source = source.unwrap_or_else(|| "legacy".to_string());
            let user_id = user_id.unwrap_or_else(|| "anonymous".to_string());

            for line in &lines {
                // TSV lines dedupe on the event id in the first field.
                let id_part = line.split('\t').next().unwrap_or("").trim();
                if config.dedupe_enabled()
                    && state
                        .dedupe()
                        .lock()
                        .expect("dedupe mutex poisoned")
                        .check_and_record(id_part, now)
                {
                    dropped_duplicates += 1;
                    continue;
                }

                let (id, packed) = pack_tsv_line(line, &source, &user_id, &meta);
                rows.push(AcceptedRow { id, packed });
            }

            duplicate = received > 0 && dropped_duplicates == received;
        }
    }

    let appended = rows.len();
    state.add_received(received as u64);
    state.add_dropped_duplicates(dropped_duplicates as u64);

    let mut stored = 0usize;
    let mut queue_length: Option<usize> = None;

    if config.store_enabled() {
        let mut ring = state.ring().lock().expect("ring mutex poisoned");
        ring.push(SummaryRecord {
            ts_ms: now,
            fingerprint: request_fp.as_str().to_string(),
            bytes: body.raw.len(),
            duplicate,
        });
        stored = ring.len();
    }

    if config.forwarding_enabled() {
        let received_at = now_iso();
        let mut queue = state.queue().lock().expect("queue mutex poisoned");
        for row in &rows {
            // Per-event enqueue: the sink sees one row per accepted event,
            // with the packed payload frozen at accept time.
            let payload_str = serde_json::to_string(&row.packed)
                .map_err(|e| ApiError::Internal(format!("payload serialisation failed: {}", e)))?;
            queue.enqueue(QueueItem {
                id: row.id.as_str().to_string(),
                fingerprint: row.id.as_str().to_string(),
                bytes: payload_str.len(),
                received_at: received_at.clone(),
                payload_str,
                retry: 0,
                last_error: None,
                next_attempt_at_ms: now,
            });
        }
        queue_length = Some(queue.len());
    }

    let latency_ms = started.elapsed().as_millis() as u64;

    debug!(
        received,
        appended, dropped_duplicates, duplicate, latency_ms, "Events request processed"
    );

    let mut response = json!({
        "ok": true,
        "received": received,
        "appended": appended,
        "dropped_duplicates": dropped_duplicates,
        "latency_ms": latency_ms,
        "mode": config.ops_mode.as_str(),
        "bytes": body.raw.len(),
        "stored": stored,
        "duplicate": duplicate,
        "external": config.external_sync,
    });
    if let Some(queue_length) = queue_length {
        response["queue_length"] = json!(queue_length);
    }

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ClientMeta {
        ClientMeta {
            ip: "203.0.113.9".to_string(),
            ua: "test-agent".to_string(),
        }
    }

    #[test]
    fn standard_event_defaults_resolve_in_order() {
        let event = IncomingEvent {
            event_id: Some("e1".to_string()),
            event_type: None,
            source: None,
            user_id: None,
            occurred_at: None,
            payload: Some(json!({"x": 1})),
        };

        let (id, packed) = pack_standard_event(event, Some("web"), None, None, &meta());

        assert_eq!(id.as_str(), "e1");
        assert_eq!(packed.v, 1);
        assert_eq!(packed.event_type, "unknown");
        assert_eq!(packed.meta.source, "web");
        assert_eq!(packed.meta.user_id, "anonymous");
        assert_eq!(packed.meta.ip, "203.0.113.9");
        assert_eq!(packed.meta.ua, "test-agent");
        assert_eq!(packed.data, json!({"x": 1}));
    }

    #[test]
    fn standard_event_without_id_synthesizes_one() {
        let event = IncomingEvent {
            event_id: None,
            event_type: Some("click".to_string()),
            source: Some("app".to_string()),
            user_id: Some("u7".to_string()),
            occurred_at: None,
            payload: None,
        };

        let (id, packed) = pack_standard_event(event, None, None, None, &meta());

        assert!(id.as_str().starts_with("evt_app_u7_"));
        assert_eq!(packed.event_type, "click");
        assert_eq!(packed.data, json!({}));
    }

    #[test]
    fn tsv_line_packs_id_and_json_payload() {
        let (id, packed) = pack_tsv_line("e2\t{\"y\":2}", "batch", "u9", &meta());

        assert_eq!(id.as_str(), "e2");
        assert_eq!(packed.event_type, "legacy.tsv");
        assert_eq!(packed.meta.source, "batch");
        assert_eq!(packed.meta.user_id, "u9");
        assert_eq!(packed.data, json!({"y": 2}));
    }

    #[test]
    fn tsv_line_with_unparseable_payload_keeps_raw_line() {
        let (_, packed) = pack_tsv_line("e3\tnot json", "legacy", "anonymous", &meta());
        assert_eq!(packed.data, json!({"raw_line": "e3\tnot json"}));
    }

    #[test]
    fn tsv_line_without_tab_gets_empty_payload() {
        let (id, packed) = pack_tsv_line("only-an-id", "legacy", "anonymous", &meta());
        assert_eq!(id.as_str(), "only-an-id");
        assert_eq!(packed.data, json!({"raw_line": "only-an-id"}));
    }
}
