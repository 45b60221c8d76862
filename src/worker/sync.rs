//! Periodic batcher from the forward queue to the batch sink.
//!
//! One tick: check the sink is configured, collect the due candidates,
//! attempt a single batch append, and either remove the delivered items or
//! defer the due prefix with exponential backoff. At most one tick runs at
//! a time; the timer and the manual `/sync/run` trigger share the flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::queue::ForwardQueue;
use crate::sink::BatchSink;
use crate::types::now_ms;

/// Result of one queue worker tick.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SyncTickReport {
    pub synced: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SyncTickReport {
    fn skipped(reason: &str) -> Self {
        SyncTickReport {
            reason: Some(reason.to_string()),
            ..SyncTickReport::default()
        }
    }

    fn disabled() -> Self {
        SyncTickReport {
            detail: Some("Worker disabled".to_string()),
            ..SyncTickReport::default()
        }
    }
}

/// Single-flight batcher for the forward queue.
pub struct SyncWorker {
    queue: Arc<Mutex<ForwardQueue>>,
    sink: Arc<dyn BatchSink>,
    config: QueueConfig,
    /// Whether the mode machine armed this worker (`FULL` + `EXTERNAL_SYNC`).
    armed: bool,
    busy: AtomicBool,
    ticks: AtomicU64,
}

impl SyncWorker {
    pub fn new(
        queue: Arc<Mutex<ForwardQueue>>,
        sink: Arc<dyn BatchSink>,
        config: QueueConfig,
        armed: bool,
    ) -> Self {
        SyncWorker {
            queue,
            sink,
            config,
            armed,
            busy: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn armed(&self) -> bool {
        self.armed
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Runs one tick. Reentrant invocations return immediately.
    pub async fn tick_once(&self) -> SyncTickReport {
        if !self.armed {
            return SyncTickReport::disabled();
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            return SyncTickReport::skipped("worker_busy");
        }

        self.ticks.fetch_add(1, Ordering::Relaxed);
        let report = self.tick_inner().await;
        self.busy.store(false, Ordering::SeqCst);
        report
    }

    async fn tick_inner(&self) -> SyncTickReport {
        if let Err(missing) = self.sink.readiness() {
            return SyncTickReport::skipped(&missing);
        }

        let now = now_ms();
        let candidates = {
            let queue = self.queue.lock().expect("queue mutex poisoned");
            queue.candidates(now, self.config.batch_size)
        };

        if candidates.is_empty() {
            return SyncTickReport::default();
        }

        debug!(candidates = candidates.len(), "Syncing queue batch");

        match self.sink.append_batch(&candidates).await {
            Ok(_) => {
                let ids: Vec<String> = candidates.iter().map(|item| item.id.clone()).collect();
                let removed = {
                    let mut queue = self.queue.lock().expect("queue mutex poisoned");
                    let removed = queue.remove_all(&ids);
                    queue.mark_synced(removed as u64);
                    removed
                };

                info!(synced = removed, "Queue batch delivered");
                SyncTickReport {
                    synced: removed as u64,
                    ..SyncTickReport::default()
                }
            }
            Err(e) => {
                let detail = e.to_string();
                warn!(error = %detail, "Queue batch delivery failed, deferring");

                let mut queue = self.queue.lock().expect("queue mutex poisoned");
                queue.defer_due(
                    now,
                    self.config.batch_size,
                    self.config.max_retry,
                    self.config.backoff_base_ms,
                    &detail,
                );

                SyncTickReport {
                    synced: 0,
                    error: Some("sync_failed".to_string()),
                    detail: Some(detail),
                    ..SyncTickReport::default()
                }
            }
        }
    }

    /// Timer loop; exits when the token is cancelled, finishing any
    /// in-flight tick first.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.worker_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_ms = self.config.worker_interval.as_millis() as u64,
            "Queue worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Queue worker stopping");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.tick_once().await;
                    if report.error.is_some() {
                        debug!(?report, "Queue worker tick failed");
                    }
                }
            }
        }
    }
}
