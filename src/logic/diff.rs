use itertools::{EitherOrBoth, Itertools};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::model::{Change, ChangeSet, EntityDefinition, FieldChange, SchemaSnapshot};

/// Fields to ignore during diff/merge operations
pub const IGNORED_FIELDS: &[&str] = &["version"];

/// Array fields whose element order carries no meaning
pub const UNORDERED_FIELDS: &[&str] = &["allowed_values", "properties", "interfaces"];

/// Structural diff between two schema snapshots
pub struct DiffEngine;

impl DiffEngine {
    /// Compute the changes that turn `base` into `target`.
    /// Changes come out ordered by entity id.
    pub fn diff(base: &SchemaSnapshot, target: &SchemaSnapshot) -> ChangeSet {
        let mut changes = Vec::new();

        let pairs = base
            .entities
            .iter()
            .merge_join_by(target.entities.iter(), |(a, _), (b, _)| a.cmp(b));

        for pair in pairs {
            match pair {
                EitherOrBoth::Left((id, before)) => changes.push(Change {
                    entity_id: id.clone(),
                    ..Change::removed(before.clone())
                }),
                EitherOrBoth::Right((id, after)) => changes.push(Change {
                    entity_id: id.clone(),
                    ..Change::added(after.clone())
                }),
                EitherOrBoth::Both((id, before), (_, after)) => {
                    let field_changes = Self::diff_entity(before, after);
                    if !field_changes.is_empty() {
                        changes.push(Change {
                            entity_id: id.clone(),
                            ..Change::modified(before.clone(), after.clone(), field_changes)
                        });
                    }
                }
            }
        }

        ChangeSet {
            from_commit: base.commit_id.clone(),
            to_commit: target.commit_id.clone(),
            changes,
        }
    }

    /// Field-level differences between two definitions of the same entity
    pub fn diff_entity(before: &EntityDefinition, after: &EntityDefinition) -> Vec<FieldChange> {
        let old = to_json(before);
        let new = to_json(after);
        let mut out = Vec::new();
        let mut path = Vec::new();
        compare_values(&mut path, &old, &new, &mut out);
        out
    }
}

pub(crate) fn to_json(definition: &EntityDefinition) -> Value {
    // model types are plain data and always serialize
    serde_json::to_value(definition).unwrap_or(Value::Null)
}

fn compare_values(path: &mut Vec<String>, old: &Value, new: &Value, out: &mut Vec<FieldChange>) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for key in keys {
                if path.is_empty() && IGNORED_FIELDS.contains(&key.as_str()) {
                    continue;
                }
                let left = a.get(key).unwrap_or(&Value::Null);
                let right = b.get(key).unwrap_or(&Value::Null);
                path.push(key.clone());
                compare_values(path, left, right, out);
                path.pop();
            }
        }
        (Value::Array(a), Value::Array(b)) if is_unordered(path) => {
            if !same_set(a, b) {
                out.push(field_change(path, old, new));
            }
        }
        _ => {
            if old != new {
                out.push(field_change(path, old, new));
            }
        }
    }
}

fn is_unordered(path: &[String]) -> bool {
    path.last()
        .map(|f| UNORDERED_FIELDS.contains(&f.as_str()))
        .unwrap_or(false)
}

pub(crate) fn same_set(a: &[Value], b: &[Value]) -> bool {
    canonical_set(a) == canonical_set(b)
}

fn canonical_set(values: &[Value]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn field_change(path: &[String], old: &Value, new: &Value) -> FieldChange {
    FieldChange {
        field_path: path.to_vec(),
        old_value: non_null(old),
        new_value: non_null(new),
    }
}

fn non_null(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        other => Some(other.clone()),
    }
}

/// Read the value at `path`, treating missing keys as absent
pub(crate) fn get_path<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = current.get(segment)?;
    }
    match current {
        Value::Null => None,
        other => Some(other),
    }
}

/// Write (or remove, for `None`) the value at `path`, creating objects on the way
pub(crate) fn set_path(value: &mut Value, path: &[String], new_value: Option<Value>) {
    let Some((last, parents)) = path.split_last() else {
        if let Some(v) = new_value {
            *value = v;
        }
        return;
    };

    let mut current = value;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        current = match current {
            Value::Object(map) => map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Default::default())),
            _ => return,
        };
    }

    if !current.is_object() {
        *current = Value::Object(Default::default());
    }
    if let Value::Object(map) = current {
        match new_value {
            Some(v) => {
                map.insert(last.clone(), v);
            }
            None => {
                map.remove(last);
            }
        }
    }
}
