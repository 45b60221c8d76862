//! External sink clients and the seams the workers talk through.
//!
//! Both sinks sit behind traits so the workers and handlers can be driven
//! against scripted fakes in tests: the webhook sink (an HTTP web app
//! reached with a shared secret) and the batch sink (a spreadsheet API
//! reached with service-account credentials).

pub mod sheets;
pub mod webhook;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::QueueItem;

/// Errors from the batch sink. The queue worker turns these into retries.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("api error: status {status}: {body}")]
    Api { status: u16, body: String },
}

/// Normalised result of one webhook POST.
///
/// `ok` reflects the remote body's `ok` field, not the HTTP status: the
/// endpoint may answer 200 with `ok:false`, which counts as a failure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WebhookOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl WebhookOutcome {
    pub fn failure(error: impl Into<String>, latency_ms: u64) -> Self {
        WebhookOutcome {
            ok: false,
            latency_ms,
            error: Some(error.into()),
            ..WebhookOutcome::default()
        }
    }

    /// Short failure description used for spool `reason` fields and logs.
    pub fn summary(&self) -> String {
        if let Some(error) = &self.error {
            return error.clone();
        }
        if self.ok {
            return "ok".to_string();
        }
        match self.status {
            Some(status) => format!("gas_not_ok status={}", status),
            None => "gas_not_ok".to_string(),
        }
    }
}

/// The webhook delivery seam.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    /// POSTs one event body and normalises the result; never panics and
    /// never returns an error (failures are data).
    async fn post(&self, event: &Value) -> WebhookOutcome;
}

/// The spreadsheet batch-append seam.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Reports what required configuration is missing, if any.
    fn readiness(&self) -> Result<(), String>;

    /// Appends all items in one batch call; all-or-nothing from the
    /// caller's point of view.
    async fn append_batch(&self, items: &[QueueItem]) -> Result<usize, SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_summary_prefers_error() {
        let outcome = WebhookOutcome::failure("gas_timeout", 2500);
        assert_eq!(outcome.summary(), "gas_timeout");
    }

    #[test]
    fn remote_ok_false_summary_includes_status() {
        let outcome = WebhookOutcome {
            ok: false,
            status: Some(200),
            latency_ms: 10,
            ..WebhookOutcome::default()
        };
        assert_eq!(outcome.summary(), "gas_not_ok status=200");
    }
}
