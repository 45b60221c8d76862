//! Fixed-capacity summary ring.
//!
//! An ordered sequence of per-request summary records, newest at the tail.
//! On overflow the oldest record is dropped, so the ring never exceeds its
//! capacity.

use std::collections::VecDeque;

use crate::types::SummaryRecord;

/// Bounded ring of recent ingest summaries.
#[derive(Debug)]
pub struct SummaryRing {
    cap: usize,
    buf: VecDeque<SummaryRecord>,
}

impl SummaryRing {
    pub fn new(cap: usize) -> Self {
        SummaryRing {
            cap,
            buf: VecDeque::with_capacity(cap.min(1024)),
        }
    }

    /// Appends a record, trimming from the front to keep `len() <= cap`.
    pub fn push(&mut self, record: SummaryRecord) {
        self.buf.push_back(record);
        while self.buf.len() > self.cap {
            self.buf.pop_front();
        }
    }

    /// Returns the newest `min(k, len)` records, oldest-first.
    pub fn tail(&self, k: usize) -> Vec<SummaryRecord> {
        let skip = self.buf.len().saturating_sub(k);
        self.buf.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
