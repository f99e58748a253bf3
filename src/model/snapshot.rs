use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::VersioningError;
use crate::model::{
    Change, ChangeKind, EntityDefinition, Id, LinkTypeDef, RuleKind, Violation,
};

/// Immutable schema state of one branch at one commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub branch_id: String,
    /// Empty until the snapshot has been committed
    pub commit_id: String,
    pub parent_commit_id: Option<String>,
    /// Entities keyed by api name
    pub entities: BTreeMap<Id, EntityDefinition>,
}

impl SchemaSnapshot {
    pub fn empty(branch_id: impl Into<String>) -> Self {
        Self {
            branch_id: branch_id.into(),
            commit_id: String::new(),
            parent_commit_id: None,
            entities: BTreeMap::new(),
        }
    }

    /// Build an uncommitted snapshot, rejecting duplicate api names
    pub fn from_definitions(
        branch_id: impl Into<String>,
        definitions: Vec<EntityDefinition>,
    ) -> Result<Self, VersioningError> {
        let mut snapshot = Self::empty(branch_id);
        let mut violations = Vec::new();

        for definition in definitions {
            let api_name = definition.api_name().to_string();
            if snapshot.entities.contains_key(&api_name) {
                violations.push(Violation::error(
                    RuleKind::UniqueApiName,
                    api_name.clone(),
                    format!("api name '{}' is defined more than once", api_name),
                ));
                continue;
            }
            snapshot.entities.insert(api_name, definition);
        }

        if violations.is_empty() {
            Ok(snapshot)
        } else {
            Err(VersioningError::Validation(violations))
        }
    }

    pub fn get(&self, entity_id: &str) -> Option<&EntityDefinition> {
        self.entities.get(entity_id)
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.entities.contains_key(entity_id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn is_committed(&self) -> bool {
        !self.commit_id.is_empty()
    }

    pub fn link_types(&self) -> impl Iterator<Item = &LinkTypeDef> {
        self.entities.values().filter_map(|e| match e {
            EntityDefinition::LinkType(link) => Some(link),
            _ => None,
        })
    }

    /// Entities keyed under a different api name than they declare
    pub fn key_mismatches(&self) -> Vec<Violation> {
        self.entities
            .iter()
            .filter(|(key, def)| key.as_str() != def.api_name())
            .map(|(key, def)| {
                Violation::error(
                    RuleKind::UniqueApiName,
                    key.clone(),
                    format!("stored under '{}' but declares '{}'", key, def.api_name()),
                )
            })
            .collect()
    }

    /// Apply a single change record in place
    pub fn apply(&mut self, change: &Change) {
        match change.change_kind {
            ChangeKind::Removed => {
                self.entities.remove(&change.entity_id);
            }
            ChangeKind::Added | ChangeKind::Modified => {
                if let Some(after) = &change.after {
                    self.entities.insert(change.entity_id.clone(), after.clone());
                }
            }
        }
    }

    /// Make every entity that differs from `parent` carry a version strictly
    /// greater than the parent's
    pub fn bump_versions_from(&mut self, parent: &SchemaSnapshot) {
        for (id, entity) in self.entities.iter_mut() {
            if let Some(previous) = parent.entities.get(id) {
                if entity.same_content(previous) {
                    entity.set_version(previous.version());
                } else if entity.version() <= previous.version() {
                    entity.set_version(previous.version() + 1);
                }
            } else if entity.version() == 0 {
                entity.set_version(1);
            }
        }
    }

    /// Same entity content (ignoring versions), regardless of commit identity
    pub fn same_entities(&self, other: &SchemaSnapshot) -> bool {
        self.entities.len() == other.entities.len()
            && self.entities.iter().all(|(id, entity)| {
                other
                    .entities
                    .get(id)
                    .map(|o| o.same_content(entity))
                    .unwrap_or(false)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entity::fixtures::*;

    #[test]
    fn test_duplicate_api_names_are_rejected() {
        let result = SchemaSnapshot::from_definitions(
            "main",
            vec![
                object_type("Invoice", "Invoice"),
                object_type("Invoice", "Bill"),
            ],
        );
        match result {
            Err(VersioningError::Validation(violations)) => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].rule, RuleKind::UniqueApiName);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_bump_versions_only_for_changed_entities() {
        let parent = SchemaSnapshot::from_definitions(
            "main",
            vec![
                object_type("Invoice", "Invoice"),
                object_type("Customer", "Customer"),
            ],
        )
        .unwrap();

        let mut next = parent.clone();
        next.entities
            .insert("Invoice".to_string(), object_type("Invoice", "Bill"));
        next.entities
            .insert("Order".to_string(), object_type("Order", "Order"));
        next.bump_versions_from(&parent);

        assert_eq!(next.get("Invoice").unwrap().version(), 2);
        assert_eq!(next.get("Customer").unwrap().version(), 1);
        assert_eq!(next.get("Order").unwrap().version(), 1);
    }
}
