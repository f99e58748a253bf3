//! Error taxonomy for the versioning core.
//!
//! Conflicts are not errors: a merge that cannot complete automatically
//! returns a `MergeResult` with `status: conflict`. Everything here aborts
//! the current operation without persisting anything.

use thiserror::Error;

use crate::model::{format_violations, Violation};

#[derive(Debug, Error)]
pub enum VersioningError {
    /// Malformed entity definition, snapshot or resolution input
    #[error("validation failed: {}", format_violations(.0))]
    Validation(Vec<Violation>),

    /// No common ancestor within the configured walk depth
    #[error("no common ancestor between '{left}' and '{right}' within {max_depth} commits")]
    DivergedHistory {
        left: String,
        right: String,
        max_depth: usize,
    },

    /// Lock acquisition timed out; callers retry with backoff
    #[error("branch '{branch}' is busy (lock not acquired within {waited_ms}ms)")]
    BranchBusy { branch: String, waited_ms: u64 },

    #[error("cannot fast-forward '{target}' to '{source_branch}': target head is not an ancestor of source head")]
    NotFastForward {
        source_branch: String,
        target: String,
    },

    #[error("branch '{0}' not found")]
    BranchNotFound(String),

    #[error("branch '{0}' already exists")]
    BranchExists(String),

    #[error("invalid branch name '{0}'")]
    InvalidBranchName(String),

    #[error("commit '{0}' not found")]
    CommitNotFound(String),

    #[error("branch '{branch}' is protected: {reason}")]
    Protected { branch: String, reason: String },

    /// Propagated from the schema repository
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl VersioningError {
    /// Only lock contention is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, VersioningError::BranchBusy { .. })
    }
}

pub type Result<T> = std::result::Result<T, VersioningError>;
