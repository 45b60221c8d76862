//! Domain types for the ingest pipeline.

pub mod event;
pub mod ids;

pub use event::{
    EventsRequest, IncomingEvent, PackedMeta, PackedPayload, QueueItem, SpoolRecord, SpoolStage,
    SummaryRecord,
};
pub use ids::{EventId, Fingerprint, JobId, TraceId, now_iso, now_ms};
