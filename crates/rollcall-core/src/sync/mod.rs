//! Cross-store synchronization: wire messages, push channel, relational
//! API access, the scheduled reconciler and the profile updater.

mod local;
mod messages;
mod profile;
mod push;
mod reconciler;
mod relational_client;

pub use messages::{
    AddressUpdate, ApplyChange, ApplyRequest, ApplyResponse, ApplyResult, ApplyStatus,
    ChangeRecord, ChangesResponse, FailureReport, MarkFailedRequest, MarkFailedResponse,
    MarkSyncedRequest, MarkSyncedResponse, StatusResponse, SyncMessage,
};
pub use profile::{ProfileUpdateOutcome, ProfileUpdater, PROFILE_UPDATE_TIMEOUT};
pub use push::ReplicaPushClient;
pub use reconciler::{merge_by_entity, MergedChange, Reconciler, DEFAULT_LOOKBACK, CURSOR_OVERLAP};
pub use relational_client::{ClientTimeouts, HttpRelationalClient, RelationalApi};
