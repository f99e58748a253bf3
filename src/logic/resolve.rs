use serde_json::Value;
use std::collections::BTreeSet;

use crate::logic::diff::{set_path, to_json, DiffEngine};
use crate::logic::validate::validate_entity;
use crate::model::{
    Cardinality, Change, ChangeKind, Conflict, ConflictKind, EntityDefinition, FieldChange,
    ResolutionOutcome, RuleKind, ValidationResult, Violation,
};

/// Automated and manual conflict resolution
pub struct MergeResolver;

impl MergeResolver {
    /// Resolve an INFO or WARN conflict by combining both sides, preferring the
    /// less restrictive value wherever they diverge. ERROR and BLOCK conflicts
    /// are left alone.
    pub fn auto_resolve(conflict: &Conflict) -> ResolutionOutcome {
        if !conflict.is_auto_resolvable()
            || !matches!(
                conflict.conflict_kind,
                ConflictKind::DisjointFields | ConflictKind::CompatibleOverlap
            )
        {
            return ResolutionOutcome::unresolved();
        }

        let (Some(source), Some(target)) = (&conflict.source_change, &conflict.target_change) else {
            return ResolutionOutcome::unresolved();
        };
        let (Some(ancestor), Some(source_after), Some(target_after)) =
            (&source.before, &source.after, &target.after)
        else {
            return ResolutionOutcome::unresolved();
        };

        // target first, source on top
        let mut merged = to_json(ancestor);
        for tf in &target.field_changes {
            set_path(&mut merged, &tf.field_path, tf.new_value.clone());
        }
        for sf in &source.field_changes {
            let value = match target.field_changes.iter().find(|tf| tf.field_path == sf.field_path) {
                Some(tf) if tf.new_value != sf.new_value => least_restrictive(sf, tf),
                _ => sf.new_value.clone(),
            };
            set_path(&mut merged, &sf.field_path, value);
        }

        let mut resolved: EntityDefinition = match serde_json::from_value(merged) {
            Ok(def) => def,
            Err(e) => {
                log::warn!("Could not rebuild '{}' after auto-merge: {}", conflict.entity_id, e);
                return ResolutionOutcome::unresolved();
            }
        };
        resolved.set_version(source_after.version().max(target_after.version()));

        if !validate_entity(&resolved).is_empty() {
            log::debug!(
                "Auto-merged '{}' is not well formed, leaving it for manual resolution",
                conflict.entity_id
            );
            return ResolutionOutcome::unresolved();
        }

        let field_changes = DiffEngine::diff_entity(ancestor, &resolved);
        ResolutionOutcome::resolved(Change {
            entity_id: conflict.entity_id.clone(),
            ..Change::modified(ancestor.clone(), resolved, field_changes)
        })
    }

    /// Check a caller-supplied resolution for a conflict
    pub fn apply_manual_resolution(conflict: &Conflict, resolution: &Change) -> ValidationResult {
        let id = conflict.entity_id.as_str();
        let mut violations = Vec::new();

        if resolution.entity_id != conflict.entity_id {
            violations.push(Violation::error(
                RuleKind::ResolutionTarget,
                id,
                format!(
                    "resolution targets '{}' instead of '{}'",
                    resolution.entity_id, conflict.entity_id
                ),
            ));
        }

        match (resolution.change_kind, &resolution.after) {
            (ChangeKind::Removed, None) => {}
            (ChangeKind::Removed, Some(_)) => violations.push(Violation::error(
                RuleKind::ResolutionTarget,
                id,
                "a removal must not carry a resulting definition",
            )),
            (_, None) => violations.push(Violation::error(
                RuleKind::ResolutionTarget,
                id,
                "resolution carries no resulting definition",
            )),
            (_, Some(after)) => {
                if after.api_name() != resolution.entity_id {
                    violations.push(Violation::error(
                        RuleKind::UniqueApiName,
                        id,
                        format!(
                            "resulting definition is named '{}' but resolves '{}'",
                            after.api_name(),
                            resolution.entity_id
                        ),
                    ));
                }
                violations.extend(validate_entity(after));
            }
        }

        ValidationResult::from_violations(violations)
    }
}

/// Pick the value that constrains the least for a field both sides changed
fn least_restrictive(source: &FieldChange, target: &FieldChange) -> Option<Value> {
    let path: Vec<&str> = source.field_path.iter().map(String::as_str).collect();
    let (a, b) = (source.new_value.as_ref(), target.new_value.as_ref());

    match path.as_slice() {
        ["constraints", "max_length"] | ["constraints", "max_value"] => match (a, b) {
            (Some(x), Some(y)) => Some(if x.as_i64() >= y.as_i64() { x.clone() } else { y.clone() }),
            _ => None,
        },
        ["constraints", "min_length"] | ["constraints", "min_value"] => match (a, b) {
            (Some(x), Some(y)) => Some(if x.as_i64() <= y.as_i64() { x.clone() } else { y.clone() }),
            _ => None,
        },
        ["constraints", "required"] | ["constraints", "unique"] | ["required"] => {
            Some(Value::Bool(false))
        }
        ["constraints", "allowed_values"] => match (a, b) {
            (Some(Value::Array(x)), Some(Value::Array(y))) => {
                let union: BTreeSet<String> = x
                    .iter()
                    .chain(y.iter())
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                Some(Value::Array(union.into_iter().map(Value::String).collect()))
            }
            _ => None,
        },
        ["cardinality"] => {
            let parse =
                |v: Option<&Value>| v.and_then(|v| serde_json::from_value::<Cardinality>(v.clone()).ok());
            match (parse(a), parse(b)) {
                (Some(x), Some(y)) => serde_json::to_value(x.join(&y)).ok(),
                _ => source.new_value.clone(),
            }
        }
        _ => source.new_value.clone(),
    }
}
