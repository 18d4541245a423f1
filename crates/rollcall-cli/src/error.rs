use std::io;

use rollcall_core::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] rollcall_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid assignment `{0}`: expected NAME=VALUE")]
    InvalidAssignment(String),
    #[error("Invalid date `{0}`: expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("Reconciliation run {id} failed: {message}")]
    RunFailed { id: i64, message: String },
}
