//! Store services shared by the API server and the CLI

mod relational;
mod replica;

pub use relational::RelationalService;
pub use replica::{linked_relational_id, ReplicaService};

use std::path::Path;

use crate::db::{Database, Store};
use crate::error::Result;

/// Open a file-backed store, creating its parent directory first.
async fn open_store(path: &Path, store: Store) -> Result<Database> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    tracing::info!(store = store.as_str(), "Opening database at {}", path.display());
    Database::open(path, store).await
}
