//! Wire shapes for the ingest surface and the records that flow downstream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single client-submitted event inside a standard `/events` body.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingEvent {
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub user_id: Option<String>,
    pub occurred_at: Option<String>,
    pub payload: Option<Value>,
}

/// Marker for the legacy TSV action discriminator.
#[derive(Debug, Clone, Copy, Deserialize)]
pub enum TsvAction {
    #[serde(rename = "append_events_tsv")]
    AppendEventsTsv,
}

/// The two accepted `/events` body shapes.
///
/// The legacy variant is tried first: it is the only one carrying an
/// `action` field, so a standard body falls through to the second variant
/// and anything else fails deserialization (a 400).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EventsRequest {
    LegacyTsv {
        #[allow(dead_code)]
        action: TsvAction,
        lines: Vec<String>,
        source: Option<String>,
        user_id: Option<String>,
    },
    Standard {
        events: Vec<IncomingEvent>,
        source: Option<String>,
        user_id: Option<String>,
    },
}

/// Client metadata packed with every accepted event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackedMeta {
    pub source: String,
    pub user_id: String,
    pub ip: String,
    pub ua: String,
}

/// The stable payload shape handed to downstream sinks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackedPayload {
    pub v: u32,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<String>,
    pub meta: PackedMeta,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// One entry in the summary ring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryRecord {
    pub ts_ms: i64,
    pub fingerprint: String,
    pub bytes: usize,
    pub duplicate: bool,
}

/// One pending batch item in the forward queue.
///
/// `payload_str` is frozen at enqueue time: what the external sink
/// eventually sees is exactly what was accepted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueItem {
    pub id: String,
    pub fingerprint: String,
    pub bytes: usize,
    pub received_at: String,
    pub payload_str: String,
    pub retry: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub next_attempt_at_ms: i64,
}

/// Which write path produced a spool record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SpoolStage {
    #[serde(rename = "jsonl.always")]
    Always,
    #[serde(rename = "jsonl.fallback")]
    Fallback,
}

impl SpoolStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpoolStage::Always => "jsonl.always",
            SpoolStage::Fallback => "jsonl.fallback",
        }
    }
}

/// One JSONL spool line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpoolRecord {
    pub ts: String,
    pub kind: String,
    pub stage: SpoolStage,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    pub job_id: String,
    pub trace_id: String,
    pub source: String,
    pub event_type: String,
    pub payload: Value,
    pub received_at: String,
    pub ingest_latency_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn standard_body_deserializes() {
        let body = json!({
            "events": [{"event_id": "e1", "payload": {"x": 1}}],
            "source": "web",
            "user_id": "u1"
        });

        match serde_json::from_value::<EventsRequest>(body).unwrap() {
            EventsRequest::Standard {
                events,
                source,
                user_id,
            } => {
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].event_id.as_deref(), Some("e1"));
                assert_eq!(source.as_deref(), Some("web"));
                assert_eq!(user_id.as_deref(), Some("u1"));
            }
            other => panic!("expected standard shape, got {:?}", other),
        }
    }

    #[test]
    fn legacy_tsv_body_deserializes() {
        let body = json!({
            "action": "append_events_tsv",
            "lines": ["e2\t{\"y\":2}"],
            "source": "batch"
        });

        match serde_json::from_value::<EventsRequest>(body).unwrap() {
            EventsRequest::LegacyTsv { lines, source, .. } => {
                assert_eq!(lines, vec!["e2\t{\"y\":2}"]);
                assert_eq!(source.as_deref(), Some("batch"));
            }
            other => panic!("expected legacy shape, got {:?}", other),
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        let body = json!({
            "action": "append_events_csv",
            "lines": ["e2\tx"]
        });

        assert!(serde_json::from_value::<EventsRequest>(body).is_err());
    }

    #[test]
    fn unrecognised_shape_is_rejected() {
        let body = json!({"hello": "world"});
        assert!(serde_json::from_value::<EventsRequest>(body).is_err());
    }

    #[test]
    fn spool_record_roundtrips_through_jsonl() {
        let record = SpoolRecord {
            ts: "2024-05-01T00:00:00.000Z".to_string(),
            kind: "ingest".to_string(),
            stage: SpoolStage::Fallback,
            reason: Some("gas_timeout".to_string()),
            job_id: "job_x_aaaaaa".to_string(),
            trace_id: "t-1".to_string(),
            source: "a".to_string(),
            event_type: "b".to_string(),
            payload: json!({"n": 1}),
            received_at: "2024-05-01T00:00:00.000Z".to_string(),
            ingest_latency_ms: 12,
        };

        let line = serde_json::to_string(&record).unwrap();
        assert!(line.contains(r#""stage":"jsonl.fallback""#));

        let parsed: SpoolRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn spool_record_without_reason_omits_the_field() {
        let record = SpoolRecord {
            ts: "2024-05-01T00:00:00.000Z".to_string(),
            kind: "ingest".to_string(),
            stage: SpoolStage::Always,
            reason: None,
            job_id: "job_x_bbbbbb".to_string(),
            trace_id: "t-2".to_string(),
            source: "a".to_string(),
            event_type: "b".to_string(),
            payload: json!({}),
            received_at: "2024-05-01T00:00:00.000Z".to_string(),
            ingest_latency_ms: 3,
        };

        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains("reason"));
        assert!(line.contains(r#""stage":"jsonl.always""#));
    }
}
