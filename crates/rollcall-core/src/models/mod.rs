//! Data models for Rollcall

mod audit;
mod document;
mod entity_key;
mod member;
mod queue;
mod run;

pub use audit::AuditEntry;
pub use document::{get_path, remove_path, set_path, Document, WriteOrigin};
pub use entity_key::EntityKey;
pub use member::{MemberInput, MemberRecord};
pub use queue::{
    FieldChanges, NewQueueEntry, QueueEntry, QueueStatus, QueueSummary, StoreSide, SyncAction,
};
pub use run::{DirectionStats, RunStats, RunStatus, StepOutcome, SyncRun, NewSyncRun};
