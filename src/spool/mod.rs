//! Durable JSONL spool: serialised appends with rotation, line-aligned
//! offset reads, and atomic replay-state persistence.
//!
//! The spool is the gateway's staging area for records that could not be
//! (or are configured to always be) delivered synchronously. It is
//! append-only; the only mutation besides append is rotation, which renames
//! the active file away. The replay worker advances a persisted byte offset
//! through it, so offsets must always be line-aligned.

pub mod reader;
pub mod state;
pub mod writer;

pub use reader::{SpoolChunk, SpoolLine, read_from, tail_lines};
pub use state::{ReplayState, ReplayStateStore};
pub use writer::{SpoolWriteError, SpoolWriter};
