//! Spool replay with stop-on-first-failure offset advancement.
//!
//! Each tick reads a bounded window of the spool from the persisted offset,
//! filters it down to the stages the replay mode covers, and re-submits the
//! candidates to the webhook sequentially. The offset only ever advances
//! past records that were delivered (or records the mode filters out), so
//! it never crosses an undelivered record: at-least-once delivery survives
//! restarts and crashes. Rotated `.bak` files are never replayed.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, ReplayMode};
use crate::sink::WebhookSink;
use crate::spool::{ReplayState, ReplayStateStore, read_from};
use crate::types::now_iso;

/// Result of one replay tick.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReplayTickReport {
    pub sent: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub offset: u64,
}

impl ReplayTickReport {
    fn skipped(reason: &str) -> Self {
        ReplayTickReport {
            skipped: Some(true),
            reason: Some(reason.to_string()),
            ..ReplayTickReport::default()
        }
    }
}

/// Single-flight reader re-submitting spooled records to the webhook.
pub struct ReplayWorker {
    config: Arc<Config>,
    webhook: Arc<dyn WebhookSink>,
    store: ReplayStateStore,
    spool_path: PathBuf,
    busy: AtomicBool,
    ticks: AtomicU64,
}

impl ReplayWorker {
    pub fn new(config: Arc<Config>, webhook: Arc<dyn WebhookSink>) -> Self {
        let store = ReplayStateStore::new(config.replay_state_path());
        let spool_path = config.spool.path();
        ReplayWorker {
            config,
            webhook,
            store,
            spool_path,
            busy: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> ReplayState {
        self.store.load()
    }

    /// Runs one tick. Reentrant invocations return immediately.
    pub async fn tick_once(&self) -> ReplayTickReport {
        if !self.config.spool_enabled() {
            return ReplayTickReport::skipped("jsonl_disabled");
        }
        if !self.config.replay.enabled {
            return ReplayTickReport::skipped("replay_disabled");
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            return ReplayTickReport::skipped("replay_busy");
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);
        let report = self.tick_inner().await;
        self.busy.store(false, Ordering::SeqCst);
        report
    }

    async fn tick_inner(&self) -> ReplayTickReport {
        let file_size = match std::fs::metadata(&self.spool_path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ReplayTickReport::skipped("no_jsonl_file");
            }
            Err(e) => {
                warn!(error = %e, path = %self.spool_path.display(), "Failed to stat spool");
                return self.record_io_failure(format!("spool_stat_error: {}", e));
            }
        };

        let mut state = self.store.load();
        let loaded = state.clone();

        // A persisted offset beyond the file means the spool rotated
        // underneath us; the rotated file is preserved but not replayed.
        if state.offset > file_size {
            info!(
                offset = state.offset,
                file_size, "Spool shrank (rotation), restarting from zero"
            );
            state.offset = 0;
        }

        let chunk = match read_from(
            &self.spool_path,
            state.offset,
            self.config.replay.max_bytes_per_tick,
        ) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "Failed to read spool");
                return self.record_io_failure(format!("spool_read_error: {}", e));
            }
        };

        let mut advance_to = state.offset;
        let mut sent_this_tick = 0u64;
        let mut batch_used = 0usize;
        let mut window_fully_processed = true;

        for line in &chunk.lines {
            if !self.is_candidate(&line.value) {
                // Filtered out by the replay mode: consumed as the offset
                // passes it.
                advance_to = line.end_offset;
                continue;
            }

            if batch_used >= self.config.replay.batch_size {
                // Leave the rest of the window for the next tick.
                window_fully_processed = false;
                break;
            }
            batch_used += 1;

            let outbound = reshape_for_replay(&line.value);
            let outcome = self.webhook.post(&outbound).await;

            if !outcome.ok {
                let reason = outcome.summary();
                warn!(
                    offset = advance_to,
                    error = %reason,
                    "Replay stopped at first failure"
                );

                state.offset = advance_to;
                state.sent += sent_this_tick;
                state.failed += 1;
                state.last_error = Some(reason);
                self.persist(&mut state);

                return ReplayTickReport {
                    sent: sent_this_tick,
                    failed: 1,
                    offset: state.offset,
                    ..ReplayTickReport::default()
                };
            }

            sent_this_tick += 1;
            advance_to = line.end_offset;
        }

        // Full success over the processed prefix. When no candidate was left
        // behind, trailing skipped bytes (malformed or empty lines) up to the
        // last complete line are consumed too.
        if window_fully_processed {
            advance_to = chunk.new_offset;
        }

        state.offset = advance_to;
        state.sent += sent_this_tick;
        state.last_error = None;
        if state != loaded {
            self.persist(&mut state);
        }

        if sent_this_tick > 0 {
            info!(sent = sent_this_tick, offset = state.offset, "Replayed spool records");
        } else {
            debug!(offset = state.offset, "Replay tick found nothing to send");
        }

        ReplayTickReport {
            sent: sent_this_tick,
            offset: state.offset,
            ..ReplayTickReport::default()
        }
    }

    fn is_candidate(&self, line: &Value) -> bool {
        let stage = line.get("stage").and_then(Value::as_str).unwrap_or("");
        match self.config.replay.mode {
            ReplayMode::FallbackOnly => stage == "jsonl.fallback",
            ReplayMode::All => stage == "jsonl.fallback" || stage == "jsonl.always",
        }
    }

    fn persist(&self, state: &mut ReplayState) {
        if let Err(e) = self.store.save(state) {
            warn!(error = %e, "Failed to persist replay state");
        }
    }

    fn record_io_failure(&self, reason: String) -> ReplayTickReport {
        let mut state = self.store.load();
        state.failed += 1;
        state.last_error = Some(reason.clone());
        self.persist(&mut state);

        ReplayTickReport {
            failed: 1,
            reason: Some(reason),
            offset: state.offset,
            ..ReplayTickReport::default()
        }
    }

    /// Timer loop; exits when the token is cancelled, finishing any
    /// in-flight tick first.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.replay.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_ms = self.config.replay.interval.as_millis() as u64,
            "Replay worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Replay worker stopping");
                    break;
                }
                _ = interval.tick() => {
                    self.tick_once().await;
                }
            }
        }
    }
}

/// Copies a spooled record verbatim for the sink, adding `replayed_at`.
fn reshape_for_replay(line: &Value) -> Value {
    let mut outbound = line.clone();
    if let Some(map) = outbound.as_object_mut() {
        map.insert("replayed_at".to_string(), Value::String(now_iso()));
    }
    outbound
}
