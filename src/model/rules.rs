use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::model::{Id, Severity};

/// Identifies which rule produced a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    EntityWellFormed,
    UniqueApiName,
    ReferentialIntegrity,
    KindStability,
    VersionMonotonic,
    ArchivedReference,
    AcyclicLinks,
    ResolutionTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: RuleKind,
    pub entity_id: Id,
    pub severity: Severity,
    pub message: String,
}

impl Violation {
    pub fn error(rule: RuleKind, entity_id: impl Into<Id>, message: impl Into<String>) -> Self {
        Self {
            rule,
            entity_id: entity_id.into(),
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warn(rule: RuleKind, entity_id: impl Into<Id>, message: impl Into<String>) -> Self {
        Self {
            rule,
            entity_id: entity_id.into(),
            severity: Severity::Warn,
            message: message.into(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity >= Severity::Error
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}: {}", self.rule, self.entity_id, self.message)
    }
}

/// Outcome of validating a definition, a resolution or a whole snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            valid: !violations.iter().any(Violation::is_blocking),
            violations,
        }
    }

    pub fn blocking(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.is_blocking())
    }
}

pub fn format_violations(violations: &[Violation]) -> String {
    violations.iter().map(|v| v.to_string()).join("; ")
}
