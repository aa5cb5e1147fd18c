//! Session lifecycle for the HumanSign agent.
//!
//! A session owns its ledger, accepted event history and batch buffer. The
//! capture side batches events out; the receiving side ingests batches
//! idempotently. Both sides share [`SessionAggregate`].

pub mod aggregate;
pub mod buffer;
pub mod context;
pub mod ledger;
pub mod spool;
pub mod store;

// Re-export commonly used types
pub use aggregate::{
    AggregateSnapshot, Analysis, IngestOutcome, PipelineConfig, Session, SessionAggregate,
    SessionError, SessionState, SNAPSHOT_FORMAT_VERSION,
};
pub use buffer::{BatchBuffer, BatchSink, EventBatch, FlushPolicy, TransportError};
pub use context::{CaptureContext, PumpReport};
pub use ledger::{CharacterLedger, VolumeRatios};
pub use spool::{DiscardSink, SpoolSink};
pub use store::{SnapshotError, SnapshotStore};
