//! Background workers.
//!
//! Two periodic, single-flight workers drive the asynchronous halves of the
//! pipeline: the queue worker batches the forward queue into the
//! spreadsheet sink with retry and backoff, and the replay worker advances a
//! persistent offset through the JSONL spool, re-submitting records to the
//! webhook with strict stop-on-first-failure semantics.
//!
//! Manual triggers (`/sync/run`, `/replay/run`) call the same tick functions
//! and share the same busy flags as the timers.

pub mod replay;
pub mod sync;

pub use replay::{ReplayTickReport, ReplayWorker};
pub use sync::{SyncTickReport, SyncWorker};
