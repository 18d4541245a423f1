//! rollcall-core - Core library for Rollcall
//!
//! This crate holds the member models, both store layers, the field
//! transformer and change detectors, and the synchronization engine shared
//! by the API server and the CLI.

pub mod audit;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod models;
pub mod secrets;
pub mod services;
pub mod sync;
pub mod transform;
pub mod util;

pub use error::{Error, Result};
pub use models::{Document, EntityKey, MemberRecord, QueueEntry, SyncRun};
pub use services::{RelationalService, ReplicaService};
