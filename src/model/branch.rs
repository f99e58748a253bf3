use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    #[default]
    Active,
    Archived,
}

/// Per-branch protection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProtectionRules {
    #[serde(default)]
    pub protected: bool,
    /// Allow moving the head to a commit that does not descend from it
    #[serde(default)]
    pub allow_force_update: bool,
    /// Highest conflict severity a merge into this branch may auto-resolve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_resolve_threshold: Option<Severity>,
}

impl ProtectionRules {
    pub fn protected() -> Self {
        Self {
            protected: true,
            allow_force_update: false,
            auto_resolve_threshold: None,
        }
    }

    pub fn allows_force_update(&self) -> bool {
        !self.protected || self.allow_force_update
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOperation {
    Commit,
    Merge,
    Revert,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockState {
    #[default]
    Unlocked,
    Locked {
        operation: LockOperation,
        acquired_at: DateTime<Utc>,
    },
}

impl LockState {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub head_commit_id: String,
    pub parent_branch: Option<String>,
    pub description: Option<String>,
    pub created_at: String, // ISO 8601 timestamp
    #[serde(default)]
    pub status: BranchStatus,
    #[serde(default)]
    pub protection: ProtectionRules,
    /// Filled in by the lock manager on read; never stored
    #[serde(skip)]
    pub lock_state: LockState,
}

impl Branch {
    pub fn new(
        name: impl Into<String>,
        head_commit_id: impl Into<String>,
        parent_branch: Option<String>,
        description: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            head_commit_id: head_commit_id.into(),
            parent_branch,
            description,
            created_at: Utc::now().to_rfc3339(),
            status: BranchStatus::Active,
            protection: ProtectionRules::default(),
            lock_state: LockState::Unlocked,
        }
    }

    pub fn is_protected(&self) -> bool {
        self.protection.protected
    }

    pub fn can_be_merged(&self) -> bool {
        self.status == BranchStatus::Active
    }
}

/// Branch names follow git-style rules: non-empty, no whitespace, no `..`,
/// no leading or trailing `/`.
pub fn is_valid_branch_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && !name.contains("..")
        && !name.starts_with('/')
        && !name.ends_with('/')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.'))
}
