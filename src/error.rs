//! Process-level errors (SPEC_FULL.md §B.4), distinct from the per-request
//! [`crate::errors::ErrorKind`] the HTTP engine uses for protocol
//! dispositions. These are the failures that can abort startup or force the
//! supervisor to exit with a non-zero status (spec §6 CLI surface).

use std::path::PathBuf;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("failed to load config from {path}: {source}")]
    Config { path: PathBuf, source: Box<dyn std::error::Error + Send + Sync> },

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: std::io::Error },

    #[error("failed to fork worker {index}: {source}")]
    Fork { index: usize, source: std::io::Error },

    #[error("failed to install signal handler for {signal}: {source}")]
    Signal { signal: &'static str, source: std::io::Error },

    #[error("worker {index} exceeded the consecutive restart failure budget")]
    RestartBudgetExceeded { index: usize },

    #[error("failed to set CPU affinity for worker {index}: {source}")]
    Affinity { index: usize, source: std::io::Error },
}
