use serde::{Deserialize, Serialize};

use crate::model::{EntityDefinition, Id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// Represents a field-level change inside a modified entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field_path: Vec<String>,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
}

impl FieldChange {
    pub fn path_string(&self) -> String {
        self.field_path.join(".")
    }

    /// Two paths overlap when they are equal or one is a prefix of the other
    pub fn overlaps(&self, other: &FieldChange) -> bool {
        let len = self.field_path.len().min(other.field_path.len());
        self.field_path[..len] == other.field_path[..len]
    }
}

/// One entity-level difference between two snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub entity_id: Id,
    pub change_kind: ChangeKind,
    pub before: Option<EntityDefinition>,
    pub after: Option<EntityDefinition>,
    /// Populated for `modified` changes only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_changes: Vec<FieldChange>,
}

impl Change {
    pub fn added(after: EntityDefinition) -> Self {
        Self {
            entity_id: after.api_name().to_string(),
            change_kind: ChangeKind::Added,
            before: None,
            after: Some(after),
            field_changes: Vec::new(),
        }
    }

    pub fn removed(before: EntityDefinition) -> Self {
        Self {
            entity_id: before.api_name().to_string(),
            change_kind: ChangeKind::Removed,
            before: Some(before),
            after: None,
            field_changes: Vec::new(),
        }
    }

    pub fn modified(
        before: EntityDefinition,
        after: EntityDefinition,
        field_changes: Vec<FieldChange>,
    ) -> Self {
        Self {
            entity_id: after.api_name().to_string(),
            change_kind: ChangeKind::Modified,
            before: Some(before),
            after: Some(after),
            field_changes,
        }
    }

    pub fn field(&self, path: &[String]) -> Option<&FieldChange> {
        self.field_changes.iter().find(|f| f.field_path == path)
    }
}

/// Ordered differences between two snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChangeSet {
    pub from_commit: String,
    pub to_commit: String,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChangeSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub entity_ids: Vec<Id>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, entity_id: &str) -> Option<&Change> {
        self.changes.iter().find(|c| c.entity_id == entity_id)
    }

    pub fn of_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(move |c| c.change_kind == kind)
    }

    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            added: self.of_kind(ChangeKind::Added).count(),
            removed: self.of_kind(ChangeKind::Removed).count(),
            modified: self.of_kind(ChangeKind::Modified).count(),
            entity_ids: self.changes.iter().map(|c| c.entity_id.clone()).collect(),
        }
    }
}
