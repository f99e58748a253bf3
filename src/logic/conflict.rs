use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::logic::diff::{get_path, to_json};
use crate::model::{
    Cardinality, Change, ChangeKind, ChangeSet, Conflict, ConflictKind, EntityDefinition,
    FieldChange, Id, SchemaSnapshot, Severity,
};

/// Classifies overlapping changes from two diverging branches
pub struct ConflictDetector;

impl ConflictDetector {
    /// `changes_a` holds the source branch changes, `changes_b` the target
    /// branch changes, both computed against `ancestor`.
    pub fn detect_conflicts(
        ancestor: &SchemaSnapshot,
        changes_a: &ChangeSet,
        changes_b: &ChangeSet,
    ) -> Vec<Conflict> {
        let target_by_id: HashMap<&str, &Change> = changes_b
            .changes
            .iter()
            .map(|c| (c.entity_id.as_str(), c))
            .collect();

        let mut conflicts: Vec<Conflict> = changes_a
            .changes
            .iter()
            .filter_map(|source| {
                target_by_id
                    .get(source.entity_id.as_str())
                    .and_then(|target| Self::classify(source, target))
            })
            .collect();

        conflicts.extend(Self::detect_link_cycles(ancestor, changes_a, changes_b));
        sort_conflicts(&mut conflicts);

        log::debug!(
            "Detected {} conflicts between {} and {}",
            conflicts.len(),
            changes_a.to_commit,
            changes_b.to_commit
        );
        conflicts
    }

    /// Classify two changes on the same entity. `None` means they converge.
    pub fn classify(source: &Change, target: &Change) -> Option<Conflict> {
        use ChangeKind::*;

        match (source.change_kind, target.change_kind) {
            (Added, Added) => {
                let same = match (&source.after, &target.after) {
                    (Some(a), Some(b)) => a.same_content(b),
                    _ => false,
                };
                if same {
                    None
                } else {
                    Some(conflict(
                        source,
                        target,
                        ConflictKind::DuplicateCreation,
                        Severity::Block,
                        Vec::new(),
                        format!(
                            "'{}' was created on both branches with different definitions",
                            source.entity_id
                        ),
                    ))
                }
            }
            (Removed, Removed) => None,
            (Removed, Modified) | (Modified, Removed) => {
                let (remover, modifier) = if source.change_kind == Removed {
                    ("source", "target")
                } else {
                    ("target", "source")
                };
                Some(conflict(
                    source,
                    target,
                    ConflictKind::ModifyDelete,
                    Severity::Error,
                    Vec::new(),
                    format!(
                        "'{}' was removed on the {} branch but modified on the {} branch",
                        source.entity_id, remover, modifier
                    ),
                ))
            }
            (Modified, Modified) => Self::classify_modifications(source, target),
            _ => Some(conflict(
                source,
                target,
                ConflictKind::IncompatibleOverlap,
                Severity::Error,
                Vec::new(),
                format!(
                    "'{}' has inconsistent histories ({:?} vs {:?})",
                    source.entity_id, source.change_kind, target.change_kind
                ),
            )),
        }
    }

    fn classify_modifications(source: &Change, target: &Change) -> Option<Conflict> {
        let source_after = source.after.as_ref().map(to_json).unwrap_or(Value::Null);
        let target_after = target.after.as_ref().map(to_json).unwrap_or(Value::Null);

        let mut divergent: Vec<(&FieldChange, &FieldChange)> = Vec::new();
        for sf in &source.field_changes {
            for tf in &target.field_changes {
                if sf.overlaps(tf) && !converges(sf, tf, &source_after, &target_after) {
                    divergent.push((sf, tf));
                }
            }
        }

        let one_sided = source
            .field_changes
            .iter()
            .any(|sf| !target.field_changes.iter().any(|tf| sf.overlaps(tf)))
            || target
                .field_changes
                .iter()
                .any(|tf| !source.field_changes.iter().any(|sf| sf.overlaps(tf)));

        if divergent.is_empty() {
            if !one_sided {
                return None;
            }
            return Some(conflict(
                source,
                target,
                ConflictKind::DisjointFields,
                Severity::Info,
                Vec::new(),
                format!(
                    "'{}' was modified on both branches in different fields",
                    source.entity_id
                ),
            ));
        }

        let fields: Vec<String> = divergent
            .iter()
            .map(|(sf, _)| sf.path_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let compatible = divergent
            .iter()
            .all(|(sf, tf)| sf.field_path == tf.field_path && is_relaxation(sf) && is_relaxation(tf));

        if compatible {
            Some(conflict(
                source,
                target,
                ConflictKind::CompatibleOverlap,
                Severity::Warn,
                fields.clone(),
                format!(
                    "'{}' relaxed on both branches ({})",
                    source.entity_id,
                    fields.join(", ")
                ),
            ))
        } else {
            Some(conflict(
                source,
                target,
                ConflictKind::IncompatibleOverlap,
                Severity::Error,
                fields.clone(),
                format!(
                    "'{}' changed incompatibly on both branches ({})",
                    source.entity_id,
                    fields.join(", ")
                ),
            ))
        }
    }

    /// Find cycles in the combined link-type graph that neither branch has on its own
    fn detect_link_cycles(
        ancestor: &SchemaSnapshot,
        changes_a: &ChangeSet,
        changes_b: &ChangeSet,
    ) -> Vec<Conflict> {
        if !touches_links(changes_a) || !touches_links(changes_b) {
            return Vec::new();
        }

        let graph_a = link_edges(ancestor, &[changes_a]);
        let graph_b = link_edges(ancestor, &[changes_b]);
        // target changes first, source changes on top
        let merged = link_edges(ancestor, &[changes_b, changes_a]);

        let cyclic_a = cyclic_links(&graph_a);
        let cyclic_b = cyclic_links(&graph_b);

        let components = scc_index(&merged);
        let mut by_component: BTreeMap<usize, BTreeSet<&Id>> = BTreeMap::new();
        for (link_id, (from, to)) in &merged {
            if let (Some(cf), Some(ct)) = (components.get(from.as_str()), components.get(to.as_str())) {
                if cf == ct {
                    by_component.entry(*cf).or_default().insert(link_id);
                }
            }
        }

        let mut conflicts = Vec::new();
        for links in by_component.values() {
            let introduced = links
                .iter()
                .any(|id| !cyclic_a.contains(*id) && !cyclic_b.contains(*id));
            if !introduced {
                continue;
            }

            let source = changes_a.changes.iter().find(|c| links.contains(&c.entity_id));
            let target = changes_b.changes.iter().find(|c| links.contains(&c.entity_id));
            if let (Some(source), Some(target)) = (source, target) {
                let members: Vec<String> = links.iter().map(|id| id.to_string()).collect();
                let mut found = conflict(
                    source,
                    target,
                    ConflictKind::LinkCycle,
                    Severity::Block,
                    Vec::new(),
                    format!(
                        "combining both branches creates a link cycle through {}",
                        members.join(" -> ")
                    ),
                );
                found.entity_id = source.entity_id.clone();
                conflicts.push(found);
            }
        }
        conflicts
    }
}

/// Order by severity (highest first), then entity id
pub fn sort_conflicts(conflicts: &mut [Conflict]) {
    conflicts.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
}

fn conflict(
    source: &Change,
    target: &Change,
    kind: ConflictKind,
    severity: Severity,
    overlapping_fields: Vec<String>,
    description: String,
) -> Conflict {
    Conflict {
        entity_id: source.entity_id.clone(),
        conflict_kind: kind,
        severity,
        source_change: Some(source.clone()),
        target_change: Some(target.clone()),
        overlapping_fields,
        description,
        suggested_resolution: None,
    }
}

/// Overlapping field changes converge when both sides end up with the same
/// value at the shorter of the two paths
fn converges(sf: &FieldChange, tf: &FieldChange, source_after: &Value, target_after: &Value) -> bool {
    let path = if sf.field_path.len() <= tf.field_path.len() {
        &sf.field_path
    } else {
        &tf.field_path
    };
    get_path(source_after, path) == get_path(target_after, path)
}

/// Whether a single field transition only loosens the schema
pub fn is_relaxation(change: &FieldChange) -> bool {
    let path: Vec<&str> = change.field_path.iter().map(String::as_str).collect();
    let old = change.old_value.as_ref();
    let new = change.new_value.as_ref();

    match path.as_slice() {
        ["constraints", "max_length"] | ["constraints", "max_value"] => match (old, new) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(o), Some(n)) => as_i64(n) >= as_i64(o),
        },
        ["constraints", "min_length"] | ["constraints", "min_value"] => match (old, new) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(o), Some(n)) => as_i64(n) <= as_i64(o),
        },
        ["constraints", "required"] | ["constraints", "unique"] | ["required"] => {
            !new.and_then(Value::as_bool).unwrap_or(false)
        }
        ["constraints", "allowed_values"] => match (old, new) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(o), Some(n)) => string_set(n).is_superset(&string_set(o)),
        },
        ["cardinality"] => {
            let parse = |v: Option<&Value>| {
                v.and_then(|v| serde_json::from_value::<Cardinality>(v.clone()).ok())
            };
            match (parse(old), parse(new)) {
                (Some(o), Some(n)) => o.is_relaxed_by(&n),
                _ => false,
            }
        }
        _ => false,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    value.as_i64()
}

fn string_set(value: &Value) -> BTreeSet<String> {
    value
        .as_array()
        .map(|items| items.iter().map(|v| v.to_string()).collect())
        .unwrap_or_default()
}

fn is_link_change(change: &Change) -> bool {
    matches!(change.before, Some(EntityDefinition::LinkType(_)))
        || matches!(change.after, Some(EntityDefinition::LinkType(_)))
}

fn touches_links(changes: &ChangeSet) -> bool {
    changes.changes.iter().any(is_link_change)
}

/// Link id -> (source, target) after applying `layers` on top of `ancestor`
pub(crate) fn link_edges(ancestor: &SchemaSnapshot, layers: &[&ChangeSet]) -> BTreeMap<Id, (String, String)> {
    let mut edges: BTreeMap<Id, (String, String)> = ancestor
        .link_types()
        .map(|l| (l.api_name.clone(), (l.source.clone(), l.target.clone())))
        .collect();

    for layer in layers {
        for change in layer.changes.iter().filter(|c| is_link_change(c)) {
            match (&change.change_kind, &change.after) {
                (ChangeKind::Removed, _) => {
                    edges.remove(&change.entity_id);
                }
                (_, Some(EntityDefinition::LinkType(link))) => {
                    edges.insert(
                        change.entity_id.clone(),
                        (link.source.clone(), link.target.clone()),
                    );
                }
                _ => {
                    edges.remove(&change.entity_id);
                }
            }
        }
    }
    edges
}

/// Links whose endpoints sit in the same strongly connected component
pub(crate) fn cyclic_links(edges: &BTreeMap<Id, (String, String)>) -> HashSet<Id> {
    let components = scc_index(edges);
    edges
        .iter()
        .filter(|(_, (from, to))| {
            match (components.get(from.as_str()), components.get(to.as_str())) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        })
        .map(|(id, _)| id.clone())
        .collect()
}

/// Maps every node of the link graph to its strongly connected component
fn scc_index(edges: &BTreeMap<Id, (String, String)>) -> HashMap<&str, usize> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for (from, to) in edges.values() {
        graph.add_edge(from.as_str(), to.as_str(), ());
    }

    tarjan_scc(&graph)
        .into_iter()
        .enumerate()
        .flat_map(|(component, members)| members.into_iter().map(move |node| (node, component)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::diff::DiffEngine;
    use crate::model::entity::fixtures::*;

    fn snapshot(defs: Vec<EntityDefinition>) -> SchemaSnapshot {
        SchemaSnapshot::from_definitions("main", defs).unwrap()
    }

    fn replace(base: &SchemaSnapshot, def: EntityDefinition) -> SchemaSnapshot {
        let mut next = base.clone();
        next.entities.insert(def.api_name().to_string(), def);
        next
    }

    fn remove(base: &SchemaSnapshot, id: &str) -> SchemaSnapshot {
        let mut next = base.clone();
        next.entities.remove(id);
        next
    }

    fn detect(ancestor: &SchemaSnapshot, source: &SchemaSnapshot, target: &SchemaSnapshot) -> Vec<Conflict> {
        let a = DiffEngine::diff(ancestor, source);
        let b = DiffEngine::diff(ancestor, target);
        ConflictDetector::detect_conflicts(ancestor, &a, &b)
    }

    fn base() -> SchemaSnapshot {
        snapshot(vec![
            object_type("Invoice", "Invoice"),
            object_type("Customer", "Customer"),
            string_property("Invoice.number", "Invoice", Some(10), true),
            link_type("billedTo", "Invoice", "Customer", Cardinality::OneToOne),
        ])
    }

    #[test]
    fn test_duplicate_creation_blocks() {
        let ancestor = base();
        let source = replace(&ancestor, object_type("Order", "Order"));
        let target = replace(&ancestor, object_type("Order", "Purchase Order"));

        let conflicts = detect(&ancestor, &source, &target);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, Severity::Block);
        assert_eq!(conflicts[0].conflict_kind, ConflictKind::DuplicateCreation);
    }

    #[test]
    fn test_identical_additions_converge() {
        let ancestor = base();
        let source = replace(&ancestor, object_type("Order", "Order"));
        let target = replace(&ancestor, object_type("Order", "Order"));
        assert!(detect(&ancestor, &source, &target).is_empty());
    }

    #[test]
    fn test_modify_on_deleted_is_error() {
        let ancestor = base();
        let source = remove(&ancestor, "billedTo");
        let target = replace(
            &ancestor,
            link_type("billedTo", "Invoice", "Customer", Cardinality::ManyToOne),
        );

        let conflicts = detect(&ancestor, &source, &target);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, Severity::Error);
        assert_eq!(conflicts[0].conflict_kind, ConflictKind::ModifyDelete);
    }

    #[test]
    fn test_disjoint_fields_are_info() {
        let ancestor = base();
        let source = replace(&ancestor, string_property("Invoice.number", "Invoice", Some(20), true));
        let target = replace(&ancestor, string_property("Invoice.number", "Invoice", Some(10), false));

        let conflicts = detect(&ancestor, &source, &target);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, Severity::Info);
        assert_eq!(conflicts[0].conflict_kind, ConflictKind::DisjointFields);
    }

    #[test]
    fn test_both_widening_is_warn() {
        let ancestor = base();
        let source = replace(&ancestor, string_property("Invoice.number", "Invoice", Some(20), true));
        let target = replace(&ancestor, string_property("Invoice.number", "Invoice", Some(30), true));

        let conflicts = detect(&ancestor, &source, &target);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, Severity::Warn);
        assert_eq!(conflicts[0].overlapping_fields, vec!["constraints.max_length"]);
    }

    #[test]
    fn test_narrowing_is_error() {
        let ancestor = base();
        let source = replace(&ancestor, string_property("Invoice.number", "Invoice", Some(20), true));
        let target = replace(&ancestor, string_property("Invoice.number", "Invoice", Some(5), true));

        let conflicts = detect(&ancestor, &source, &target);
        assert_eq!(conflicts[0].severity, Severity::Error);
        assert_eq!(conflicts[0].conflict_kind, ConflictKind::IncompatibleOverlap);
    }

    #[test]
    fn test_cardinality_relaxations_are_warn_and_restrictions_error() {
        let ancestor = base();
        let relaxed_a = replace(&ancestor, link_type("billedTo", "Invoice", "Customer", Cardinality::OneToMany));
        let relaxed_b = replace(&ancestor, link_type("billedTo", "Invoice", "Customer", Cardinality::ManyToOne));
        let conflicts = detect(&ancestor, &relaxed_a, &relaxed_b);
        assert_eq!(conflicts[0].severity, Severity::Warn);

        let wide = replace(&ancestor, link_type("billedTo", "Invoice", "Customer", Cardinality::ManyToMany));
        let restricted = replace(&wide, link_type("billedTo", "Invoice", "Customer", Cardinality::OneToOne));
        let other = replace(&wide, link_type("billedTo", "Invoice", "Customer", Cardinality::OneToMany));
        let conflicts = detect(&wide, &restricted, &other);
        assert_eq!(conflicts[0].severity, Severity::Error);
    }

    #[test]
    fn test_identical_modifications_converge() {
        let ancestor = base();
        let changed = replace(&ancestor, string_property("Invoice.number", "Invoice", Some(20), true));
        assert!(detect(&ancestor, &changed, &changed).is_empty());
    }

    #[test]
    fn test_cycle_only_in_combination_blocks() {
        let ancestor = base();
        let source = replace(
            &ancestor,
            link_type("parentOf", "Customer", "Order", Cardinality::OneToMany),
        );
        let source = replace(&source, object_type("Order", "Order"));
        let target = replace(
            &replace(&ancestor, object_type("Order", "Order")),
            link_type("orderedBy", "Order", "Invoice", Cardinality::ManyToOne),
        );

        let conflicts = detect(&ancestor, &source, &target);
        let cycles: Vec<_> = conflicts
            .iter()
            .filter(|c| c.conflict_kind == ConflictKind::LinkCycle)
            .collect();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].severity, Severity::Block);
        assert_eq!(cycles[0].entity_id, "parentOf");
    }

    #[test]
    fn test_existing_cycles_are_not_reported() {
        let ancestor = replace(
            &base(),
            link_type("managedBy", "Customer", "Customer", Cardinality::ManyToOne),
        );
        let source = replace(&ancestor, link_type("refersTo", "Customer", "Invoice", Cardinality::ManyToOne));
        let target = replace(&ancestor, link_type("managedBy", "Customer", "Customer", Cardinality::ManyToMany));
        let conflicts = detect(&ancestor, &source, &target);
        assert!(conflicts.iter().all(|c| c.conflict_kind != ConflictKind::LinkCycle));
    }

    #[test]
    fn test_conflicts_sorted_by_severity() {
        let ancestor = base();
        let source = replace(
            &replace(&ancestor, object_type("Order", "Order")),
            string_property("Invoice.number", "Invoice", Some(20), true),
        );
        let target = replace(
            &replace(&ancestor, object_type("Order", "PO")),
            string_property("Invoice.number", "Invoice", Some(10), false),
        );
        let conflicts = detect(&ancestor, &source, &target);
        let severities: Vec<_> = conflicts.iter().map(|c| c.severity).collect();
        assert_eq!(severities, vec![Severity::Block, Severity::Info]);
    }

    #[test]
    fn test_cyclic_links_cover_loops_but_not_chains() {
        let snapshot = replace(
            &replace(
                &replace(&base(), object_type("Order", "Order")),
                link_type("managedBy", "Customer", "Customer", Cardinality::ManyToOne),
            ),
            link_type("orderedBy", "Order", "Invoice", Cardinality::ManyToOne),
        );
        let edges = link_edges(&snapshot, &[]);
        assert_eq!(edges.len(), 3);

        let cyclic = cyclic_links(&edges);
        assert_eq!(cyclic, HashSet::from(["managedBy".to_string()]));
    }
}
