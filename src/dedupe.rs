//! Short-window duplicate suppression.
//!
//! A bounded mapping from fingerprint to last-seen time. An entry is present
//! iff its age is within the window; eviction is lazy, performed at the head
//! of an insertion-ordered queue on each call so a single call never scans
//! the whole map. The window is process-local: a cold start observes no
//! duplicates.

use std::collections::{HashMap, VecDeque};

/// Sliding-window duplicate detector keyed by fingerprint.
#[derive(Debug)]
pub struct DuplicateWindow {
    window_ms: i64,
    seen: HashMap<String, i64>,
    /// Insertion-ordered (fingerprint, seen_ms) pairs for head eviction.
    /// May contain stale entries for refreshed fingerprints; eviction
    /// cross-checks the map timestamp before removing.
    order: VecDeque<(String, i64)>,
}

impl DuplicateWindow {
    pub fn new(window_ms: i64) -> Self {
        DuplicateWindow {
            window_ms,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns whether the fingerprint was already present in the window,
    /// and records it as seen at `now_ms` either way.
    ///
    /// An empty fingerprint is never a duplicate and is not recorded.
    pub fn check_and_record(&mut self, fingerprint: &str, now_ms: i64) -> bool {
        if fingerprint.is_empty() {
            return false;
        }

        self.evict(now_ms);

        let duplicate = self.seen.contains_key(fingerprint);
        self.seen.insert(fingerprint.to_string(), now_ms);
        self.order.push_back((fingerprint.to_string(), now_ms));
        duplicate
    }

    /// Number of live fingerprints in the window.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn evict(&mut self, now_ms: i64) {
        while let Some((_, ts)) = self.order.front() {
            if now_ms - *ts <= self.window_ms {
                break;
            }
            let (fingerprint, ts) = self.order.pop_front().expect("front checked above");
            // Only drop the map entry if this queue entry is its latest
            // sighting; a refreshed fingerprint leaves stale queue entries.
            if self.seen.get(&fingerprint) == Some(&ts) {
                self.seen.remove(&fingerprint);
            }
        }
    }
}
