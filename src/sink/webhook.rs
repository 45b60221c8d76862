//! Signed HTTP POST to the webhook sink.
//!
//! The shared secret travels as a `__secret` query parameter; the event body
//! is posted as JSON. Each call carries its own deadline, and the in-flight
//! request is cancelled when the deadline passes. The remote endpoint
//! answers 200 even for rejections, so success is read from the response
//! body's `ok` field rather than the HTTP status.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{WebhookOutcome, WebhookSink};
use crate::config::WebhookConfig;

/// Error reported when the webhook is not configured; the call is skipped.
pub const MISSING_CONFIG_ERROR: &str = "missing_GAS_WEBAPP_URL_or_ITPLAYLAB_SECRET";

/// Webhook client for the spreadsheet-backed web app.
pub struct GasWebhookClient {
    url: Option<String>,
    secret: Option<String>,
    timeout: Duration,
    http: reqwest::Client,
}

impl GasWebhookClient {
    pub fn new(config: &WebhookConfig) -> Self {
        GasWebhookClient {
            url: config.url.clone(),
            secret: config.secret.clone(),
            timeout: config.timeout,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl WebhookSink for GasWebhookClient {
    async fn post(&self, event: &Value) -> WebhookOutcome {
        let (url, secret) = match (&self.url, &self.secret) {
            (Some(url), Some(secret)) if !url.is_empty() && !secret.is_empty() => (url, secret),
            _ => return WebhookOutcome::failure(MISSING_CONFIG_ERROR, 0),
        };

        let started = Instant::now();
        let response = self
            .http
            .post(url)
            .query(&[("__secret", secret.as_str())])
            .json(event)
            .timeout(self.timeout)
            .send()
            .await;

        let latency_ms = started.elapsed().as_millis() as u64;

        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!(latency_ms, "Webhook POST timed out");
                return WebhookOutcome::failure("gas_timeout", latency_ms);
            }
            Err(e) => {
                warn!(error = %e, latency_ms, "Webhook POST failed");
                return WebhookOutcome::failure(format!("gas_http_error: {}", e), latency_ms);
            }
        };

        let status = response.status().as_u16();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return WebhookOutcome {
                    ok: false,
                    status: Some(status),
                    latency_ms: started.elapsed().as_millis() as u64,
                    error: Some(format!("gas_body_error: {}", e)),
                    ..WebhookOutcome::default()
                };
            }
        };

        let latency_ms = started.elapsed().as_millis() as u64;

        let data: Value = match serde_json::from_str(&text) {
            Ok(data) => data,
            Err(_) => {
                return WebhookOutcome {
                    ok: false,
                    status: Some(status),
                    latency_ms,
                    error: Some("invalid_json_from_gas".to_string()),
                    raw: Some(text),
                    ..WebhookOutcome::default()
                };
            }
        };

        // The remote verdict, independent of HTTP status.
        let ok = data.get("ok").and_then(Value::as_bool).unwrap_or(false);

        debug!(status, ok, latency_ms, "Webhook POST completed");

        WebhookOutcome {
            ok,
            status: Some(status),
            latency_ms,
            data: Some(data),
            error: if ok {
                None
            } else {
                Some("gas_ok_false".to_string())
            },
            raw: None,
        }
    }
}
