//! Structural validation of entity definitions and the merge rule registry.
//!
//! Rules are plain enum variants collected into an ordered list; each one is a
//! pure `check(old, new)` over two snapshots.

use std::collections::HashSet;

use crate::logic::conflict::{cyclic_links, link_edges};
use crate::model::{
    is_valid_api_name, DataType, EntityDefinition, EntityKind, EntityStatus, RuleKind,
    SchemaSnapshot, ValidationResult, Violation,
};

/// Validate a single definition in isolation
pub fn validate_entity(definition: &EntityDefinition) -> Vec<Violation> {
    let id = definition.api_name();
    let mut violations = Vec::new();
    let mut fail = |message: String| {
        violations.push(Violation::error(RuleKind::EntityWellFormed, id, message));
    };

    if !is_valid_api_name(id) {
        fail(format!("api name '{}' is not a valid identifier", id));
    }
    if definition.display_name().trim().is_empty() {
        fail("display name is empty".to_string());
    }

    match definition {
        EntityDefinition::ObjectType(object) => {
            if let Some(dup) = first_duplicate(&object.properties) {
                fail(format!("property '{}' is listed more than once", dup));
            }
            if let Some(dup) = first_duplicate(&object.interfaces) {
                fail(format!("interface '{}' is listed more than once", dup));
            }
            if let Some(pk) = &object.primary_key {
                if !object.properties.contains(pk) {
                    fail(format!("primary key '{}' is not one of the type's properties", pk));
                }
            }
        }
        EntityDefinition::Property(property) => {
            let c = &property.constraints;
            if property.object_type.trim().is_empty() {
                fail("property has no owning object type".to_string());
            }
            if let (Some(min), Some(max)) = (c.min_length, c.max_length) {
                if min > max {
                    fail(format!("min_length {} exceeds max_length {}", min, max));
                }
            }
            if let (Some(min), Some(max)) = (c.min_value, c.max_value) {
                if min > max {
                    fail(format!("min_value {} exceeds max_value {}", min, max));
                }
            }
            if (c.min_length.is_some() || c.max_length.is_some())
                && property.data_type != DataType::String
            {
                fail(format!(
                    "length constraints require a String property, found {:?}",
                    property.data_type
                ));
            }
            if let Some(values) = &c.allowed_values {
                if let Some(dup) = first_duplicate(values) {
                    fail(format!("allowed value '{}' is listed more than once", dup));
                }
            }
            if matches!(&c.pattern, Some(p) if p.is_empty()) {
                fail("pattern is empty".to_string());
            }
        }
        EntityDefinition::LinkType(link) => {
            if link.source.trim().is_empty() || link.target.trim().is_empty() {
                fail("link type needs both a source and a target".to_string());
            }
        }
    }

    violations
}

fn first_duplicate(items: &[String]) -> Option<&String> {
    let mut seen = HashSet::new();
    items.iter().find(|item| !seen.insert(item.as_str()))
}

/// A schema-level rule checked before any snapshot is committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    EntityWellFormed,
    UniqueApiName,
    ReferentialIntegrity,
    KindStability,
    VersionMonotonic,
    ArchivedReference,
    AcyclicLinks,
}

impl MergeRule {
    pub fn kind(&self) -> RuleKind {
        match self {
            MergeRule::EntityWellFormed => RuleKind::EntityWellFormed,
            MergeRule::UniqueApiName => RuleKind::UniqueApiName,
            MergeRule::ReferentialIntegrity => RuleKind::ReferentialIntegrity,
            MergeRule::KindStability => RuleKind::KindStability,
            MergeRule::VersionMonotonic => RuleKind::VersionMonotonic,
            MergeRule::ArchivedReference => RuleKind::ArchivedReference,
            MergeRule::AcyclicLinks => RuleKind::AcyclicLinks,
        }
    }

    pub fn check(&self, old: &SchemaSnapshot, new: &SchemaSnapshot) -> Vec<Violation> {
        match self {
            MergeRule::EntityWellFormed => new
                .entities
                .iter()
                .filter(|(id, def)| old.get(id) != Some(*def))
                .flat_map(|(_, def)| validate_entity(def))
                .collect(),
            MergeRule::UniqueApiName => new.key_mismatches(),
            MergeRule::ReferentialIntegrity => introduced(old, new, dangling_references),
            MergeRule::KindStability => new
                .entities
                .iter()
                .filter_map(|(id, def)| {
                    let previous = old.get(id)?;
                    (previous.kind() != def.kind()).then(|| {
                        Violation::error(
                            RuleKind::KindStability,
                            id.clone(),
                            format!("kind changed from {:?} to {:?}", previous.kind(), def.kind()),
                        )
                    })
                })
                .collect(),
            MergeRule::VersionMonotonic => new
                .entities
                .iter()
                .filter_map(|(id, def)| {
                    let previous = old.get(id)?;
                    (!previous.same_content(def) && def.version() <= previous.version()).then(|| {
                        Violation::error(
                            RuleKind::VersionMonotonic,
                            id.clone(),
                            format!(
                                "changed without a version increase ({} -> {})",
                                previous.version(),
                                def.version()
                            ),
                        )
                    })
                })
                .collect(),
            MergeRule::ArchivedReference => introduced(old, new, archived_references),
            MergeRule::AcyclicLinks => introduced(old, new, link_cycles),
        }
    }
}

/// Violations present in `new` but not already in `old`
fn introduced(
    old: &SchemaSnapshot,
    new: &SchemaSnapshot,
    rule: fn(&SchemaSnapshot) -> Vec<Violation>,
) -> Vec<Violation> {
    let existing = rule(old);
    rule(new)
        .into_iter()
        .filter(|v| !existing.contains(v))
        .collect()
}

fn dangling_references(snapshot: &SchemaSnapshot) -> Vec<Violation> {
    let is_object_type = |id: &str| {
        matches!(snapshot.get(id).map(|d| d.kind()), Some(EntityKind::ObjectType))
    };
    let mut violations = Vec::new();

    for (id, def) in &snapshot.entities {
        for reference in def.references() {
            if !is_object_type(reference) {
                violations.push(Violation::error(
                    RuleKind::ReferentialIntegrity,
                    id.clone(),
                    format!("references missing object type '{}'", reference),
                ));
            }
        }
        if let EntityDefinition::ObjectType(object) = def {
            for property in &object.properties {
                if !matches!(snapshot.get(property).map(|d| d.kind()), Some(EntityKind::Property)) {
                    violations.push(Violation::error(
                        RuleKind::ReferentialIntegrity,
                        id.clone(),
                        format!("lists missing property '{}'", property),
                    ));
                }
            }
        }
    }
    violations
}

/// One violation per link type that takes part in a cycle
fn link_cycles(snapshot: &SchemaSnapshot) -> Vec<Violation> {
    let edges = link_edges(snapshot, &[]);
    let mut cyclic: Vec<_> = cyclic_links(&edges).into_iter().collect();
    cyclic.sort();
    cyclic
        .into_iter()
        .map(|id| {
            let (from, to) = &edges[&id];
            Violation::error(
                RuleKind::AcyclicLinks,
                id,
                format!("link {} -> {} closes a cycle in the link graph", from, to),
            )
        })
        .collect()
}

fn archived_references(snapshot: &SchemaSnapshot) -> Vec<Violation> {
    snapshot
        .entities
        .iter()
        .filter(|(_, def)| def.status() != EntityStatus::Archived)
        .flat_map(|(id, def)| {
            def.references()
                .into_iter()
                .filter(|r| {
                    snapshot
                        .get(r)
                        .map(|t| t.status() == EntityStatus::Archived)
                        .unwrap_or(false)
                })
                .map(|r| {
                    Violation::warn(
                        RuleKind::ArchivedReference,
                        id.clone(),
                        format!("references archived object type '{}'", r),
                    )
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Ordered list of rules run against every snapshot about to be committed
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    rules: Vec<MergeRule>,
}

impl RuleRegistry {
    pub fn new(rules: Vec<MergeRule>) -> Self {
        Self { rules }
    }

    pub fn standard() -> Self {
        Self::new(vec![
            MergeRule::EntityWellFormed,
            MergeRule::UniqueApiName,
            MergeRule::ReferentialIntegrity,
            MergeRule::KindStability,
            MergeRule::VersionMonotonic,
            MergeRule::ArchivedReference,
            MergeRule::AcyclicLinks,
        ])
    }

    pub fn rules(&self) -> &[MergeRule] {
        &self.rules
    }

    pub fn check(&self, old: &SchemaSnapshot, new: &SchemaSnapshot) -> ValidationResult {
        let violations = self
            .rules
            .iter()
            .flat_map(|rule| rule.check(old, new))
            .collect();
        ValidationResult::from_violations(violations)
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
