//! Database layer for Rollcall

mod audit_repository;
mod connection;
mod document_repository;
mod member_repository;
mod migrations;
mod queue_repository;
mod run_repository;

pub use audit_repository::{AuditRepository, LibSqlAuditRepository};
pub use connection::{Database, Store};
pub use document_repository::{DocumentRepository, LibSqlDocumentRepository, StoredDocument};
pub use member_repository::{LibSqlMemberRepository, MemberRepository};
pub use queue_repository::{LibSqlQueueRepository, QueueRepository};
pub use run_repository::{LibSqlRunRepository, RunRepository};
