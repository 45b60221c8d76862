//! Bounded forward queue with per-item retry state.
//!
//! Items are consumed in FIFO order among those whose `next_attempt_at_ms`
//! has passed. The queue does not suppress duplicates (that happens upstream
//! in the duplicate window); it only bounds memory by dropping its oldest
//! item when full and counts what it dropped.

use serde::Serialize;
use std::collections::VecDeque;

use crate::types::QueueItem;

/// Counters surfaced by `/sync/status` and `/health`.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub dropped: u64,
    pub failed: u64,
    pub synced: u64,
}

/// Bounded FIFO of pending batch items.
#[derive(Debug)]
pub struct ForwardQueue {
    limit: usize,
    items: VecDeque<QueueItem>,
    dropped: u64,
    failed: u64,
    synced: u64,
}

impl ForwardQueue {
    pub fn new(limit: usize) -> Self {
        ForwardQueue {
            limit,
            items: VecDeque::new(),
            dropped: 0,
            failed: 0,
            synced: 0,
        }
    }

    /// Pushes to the tail; when full, the head is dropped first and the
    /// dropped counter incremented.
    pub fn enqueue(&mut self, item: QueueItem) {
        if self.limit > 0 && self.items.len() >= self.limit {
            self.items.pop_front();
            self.dropped += 1;
        }
        self.items.push_back(item);
    }

    /// The first `<= batch` items due at `now_ms`, in insertion order.
    pub fn candidates(&self, now_ms: i64, batch: usize) -> Vec<QueueItem> {
        self.items
            .iter()
            .filter(|item| item.next_attempt_at_ms <= now_ms)
            .take(batch)
            .cloned()
            .collect()
    }

    /// Removes items by id, returning how many were removed.
    pub fn remove_all(&mut self, ids: &[String]) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !ids.contains(&item.id));
        before - self.items.len()
    }

    /// Applies a failed delivery attempt to the due prefix of length
    /// `<= batch`: bump each item's retry, record the error, and either drop
    /// it as failed (past `max_retry`) or defer it with exponential backoff
    /// `backoff_base_ms * 2^(retry-1)`.
    pub fn defer_due(
        &mut self,
        now_ms: i64,
        batch: usize,
        max_retry: u32,
        backoff_base_ms: i64,
        error: &str,
    ) {
        let due_ids: Vec<String> = self
            .items
            .iter()
            .filter(|item| item.next_attempt_at_ms <= now_ms)
            .take(batch)
            .map(|item| item.id.clone())
            .collect();

        for id in due_ids {
            let Some(pos) = self.items.iter().position(|item| item.id == id) else {
                continue;
            };

            let item = &mut self.items[pos];
            item.retry += 1;
            item.last_error = Some(error.to_string());

            if item.retry > max_retry {
                self.items.remove(pos);
                self.failed += 1;
            } else {
                let backoff = backoff_base_ms.saturating_mul(1i64 << (item.retry - 1).min(32));
                item.next_attempt_at_ms = now_ms.saturating_add(backoff);
            }
        }
    }

    /// Credits successfully delivered items.
    pub fn mark_synced(&mut self, n: u64) {
        self.synced += n;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.items.len(),
            dropped: self.dropped,
            failed: self.failed,
            synced: self.synced,
        }
    }
}
