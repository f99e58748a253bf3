use serde::{Deserialize, Serialize};

use crate::model::{Change, Conflict, Id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Success,
    Conflict,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeKind {
    /// Target head already contains the source head
    UpToDate,
    FastForward,
    ThreeWay,
}

/// Phases of a single merge operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergePhase {
    Initiated,
    Diffing,
    ConflictDetection,
    AutoResolving,
    AwaitingManualResolution,
    Committing,
    Completed,
    Aborted,
}

impl MergePhase {
    /// Whether `next` is a legal successor of this phase
    pub fn can_transition_to(&self, next: MergePhase) -> bool {
        use MergePhase::*;
        match (self, next) {
            (Completed, _) | (Aborted, _) => false,
            (Committing, Completed) => true,
            (Committing, _) => false,
            (_, Aborted) => true,
            // fast-forward skips analysis; up-to-date has nothing to do
            (Initiated, Diffing) | (Initiated, Committing) | (Initiated, Completed) => true,
            (Diffing, ConflictDetection) => true,
            (ConflictDetection, AutoResolving) => true,
            (ConflictDetection, AwaitingManualResolution) => true,
            (AutoResolving, Committing) => true,
            (AutoResolving, AwaitingManualResolution) => true,
            (AwaitingManualResolution, Committing) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MergePhase::Completed | MergePhase::Aborted)
    }
}

impl std::fmt::Display for MergePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initiated => "INITIATED",
            Self::Diffing => "DIFFING",
            Self::ConflictDetection => "CONFLICT_DETECTION",
            Self::AutoResolving => "AUTO_RESOLVING",
            Self::AwaitingManualResolution => "AWAITING_MANUAL_RESOLUTION",
            Self::Committing => "COMMITTING",
            Self::Completed => "COMPLETED",
            Self::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MergeStats {
    pub duration_ms: u64,
    pub conflict_count: usize,
    pub auto_resolved_count: usize,
}

/// Result of one merge attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    pub merge_id: Id,
    pub source_branch: String,
    pub target_branch: String,
    pub status: MergeStatus,
    pub merge_kind: MergeKind,
    pub merge_commit_id: Option<String>,
    /// Conflicts ordered by severity (highest first), then entity id
    pub conflicts: Vec<Conflict>,
    pub final_phase: MergePhase,
    pub stats: MergeStats,
}

impl MergeResult {
    pub fn is_success(&self) -> bool {
        self.status == MergeStatus::Success
    }

    /// Conflicts that were neither auto-resolved nor given a manual resolution
    pub fn unresolved(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| c.suggested_resolution.is_none())
    }
}

/// Outcome of an automated resolution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub resolved: bool,
    pub applied_change: Option<Change>,
}

impl ResolutionOutcome {
    pub fn unresolved() -> Self {
        Self {
            resolved: false,
            applied_change: None,
        }
    }

    pub fn resolved(change: Change) -> Self {
        Self {
            resolved: true,
            applied_change: Some(change),
        }
    }
}
