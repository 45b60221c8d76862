//! Clocks, identifiers, and fingerprints.
//!
//! Newtype wrappers keep the different identifier kinds from being mixed up
//! (a job id is not a trace id) and make log fields self-documenting.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current time as an ISO-8601 / RFC 3339 string with millisecond precision.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Generates `n` random lowercase hex characters.
pub fn rand_hex(n: usize) -> String {
    const CHARSET: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// An event identifier, client-supplied or synthesised.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(s: impl Into<String>) -> Self {
        EventId(s.into())
    }

    /// Synthesises an id for an event that arrived without one:
    /// `evt_<source>_<user>_<ms-epoch>_<4-hex>`.
    pub fn synthesize(source: &str, user: &str) -> Self {
        EventId(format!(
            "evt_{}_{}_{}_{}",
            source,
            user,
            now_ms(),
            rand_hex(4)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ingest job identifier: `job_<compact-UTC-iso>_<6-hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn mint() -> Self {
        JobId(format!(
            "job_{}_{}",
            Utc::now().format("%Y%m%dT%H%M%S%3fZ"),
            rand_hex(6)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request trace identifier, taken from `X-Request-Id` when present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    pub fn from_header_or_new(header: Option<&str>) -> Self {
        match header {
            Some(h) if !h.trim().is_empty() => TraceId(h.trim().to_string()),
            _ => TraceId(uuid::Uuid::new_v4().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The value used for duplicate detection.
///
/// For `/events` JSON bodies this is the SHA-256 of the canonical serialised
/// body; for legacy TSV lines the event id in the first field; for `/ingest`
/// the generated job id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// SHA-256 (hex) of a canonical request body.
    pub fn of_body(canonical: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// A fingerprint that is the identifier itself (event id, job id).
    pub fn of_id(id: &str) -> Self {
        Fingerprint(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
