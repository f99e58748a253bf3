use serde::{Deserialize, Serialize};

use crate::model::{Change, Id};

/// Conflict severity, ordered `Info < Warn < Error < Block`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Block,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Block => write!(f, "BLOCK"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides added the same entity with different content
    DuplicateCreation,
    /// One side removed, the other modified
    ModifyDelete,
    /// Both sides modified different fields
    DisjointFields,
    /// Both sides changed the same fields, all in a relaxing direction
    CompatibleOverlap,
    /// Both sides changed the same fields and at least one change is not a relaxation
    IncompatibleOverlap,
    /// The combined link graph contains a cycle neither side has alone
    LinkCycle,
    /// The merged schema breaks a validation rule
    ConstraintViolation,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateCreation => write!(f, "duplicate_creation"),
            Self::ModifyDelete => write!(f, "modify_delete"),
            Self::DisjointFields => write!(f, "disjoint_fields"),
            Self::CompatibleOverlap => write!(f, "compatible_overlap"),
            Self::IncompatibleOverlap => write!(f, "incompatible_overlap"),
            Self::LinkCycle => write!(f, "link_cycle"),
            Self::ConstraintViolation => write!(f, "constraint_violation"),
        }
    }
}

/// A pair of diverging changes on one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub entity_id: Id,
    pub conflict_kind: ConflictKind,
    pub severity: Severity,
    /// Change made on the source (incoming) branch
    pub source_change: Option<Change>,
    /// Change made on the target (receiving) branch
    pub target_change: Option<Change>,
    /// Divergent field paths, dot separated
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overlapping_fields: Vec<String>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_resolution: Option<Change>,
}

impl Conflict {
    pub fn is_auto_resolvable(&self) -> bool {
        self.severity <= Severity::Warn
    }
}

/// Highest severity across a set of conflicts
pub fn max_severity<'a>(conflicts: impl IntoIterator<Item = &'a Conflict>) -> Option<Severity> {
    conflicts.into_iter().map(|c| c.severity).max()
}
