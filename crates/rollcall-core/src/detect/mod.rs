//! Change detectors for both stores

mod document;
mod relational;

pub use document::{detect_document_change, TRACKED_PATHS};
pub use relational::detect_relational_change;

use crate::models::{EntityKey, FieldChanges, NewQueueEntry, StoreSide, SyncAction};

/// A change worth enqueueing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedChange {
    pub action: SyncAction,
    pub field_changes: FieldChanges,
}

impl DetectedChange {
    /// Queue entry flowing from `source` to the other store.
    pub fn into_entry(self, source: StoreSide, entity_key: EntityKey) -> NewQueueEntry {
        NewQueueEntry::from_side(source, entity_key, self.action, self.field_changes)
    }
}
