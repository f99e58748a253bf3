use serde::{Deserialize, Serialize};

use crate::model::{Cardinality, DataType, EntityStatus, Id};

/// Constraints attached to a property definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PropertyConstraints {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Allowed enum values. Order carries no meaning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectTypeDef {
    pub api_name: Id,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: EntityStatus,
    #[serde(default)]
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    /// Api names of the properties belonging to this type (unordered)
    #[serde(default)]
    pub properties: Vec<Id>,
    /// Implemented interfaces (unordered)
    #[serde(default)]
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub api_name: Id,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: EntityStatus,
    #[serde(default)]
    pub version: u64,
    /// Owning object type
    pub object_type: Id,
    pub data_type: DataType,
    #[serde(default)]
    pub constraints: PropertyConstraints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkTypeDef {
    pub api_name: Id,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: EntityStatus,
    #[serde(default)]
    pub version: u64,
    pub source: Id,
    pub target: Id,
    pub cardinality: Cardinality,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ObjectType,
    Property,
    LinkType,
}

/// A schema entity stored in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityDefinition {
    ObjectType(ObjectTypeDef),
    Property(PropertyDef),
    LinkType(LinkTypeDef),
}

impl EntityDefinition {
    pub fn api_name(&self) -> &str {
        match self {
            EntityDefinition::ObjectType(d) => &d.api_name,
            EntityDefinition::Property(d) => &d.api_name,
            EntityDefinition::LinkType(d) => &d.api_name,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            EntityDefinition::ObjectType(d) => &d.display_name,
            EntityDefinition::Property(d) => &d.display_name,
            EntityDefinition::LinkType(d) => &d.display_name,
        }
    }

    pub fn status(&self) -> EntityStatus {
        match self {
            EntityDefinition::ObjectType(d) => d.status,
            EntityDefinition::Property(d) => d.status,
            EntityDefinition::LinkType(d) => d.status,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            EntityDefinition::ObjectType(d) => d.version,
            EntityDefinition::Property(d) => d.version,
            EntityDefinition::LinkType(d) => d.version,
        }
    }

    pub fn set_version(&mut self, version: u64) {
        match self {
            EntityDefinition::ObjectType(d) => d.version = version,
            EntityDefinition::Property(d) => d.version = version,
            EntityDefinition::LinkType(d) => d.version = version,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityDefinition::ObjectType(_) => EntityKind::ObjectType,
            EntityDefinition::Property(_) => EntityKind::Property,
            EntityDefinition::LinkType(_) => EntityKind::LinkType,
        }
    }

    /// Object types this entity points at
    pub fn references(&self) -> Vec<&str> {
        match self {
            EntityDefinition::ObjectType(_) => Vec::new(),
            EntityDefinition::Property(d) => vec![d.object_type.as_str()],
            EntityDefinition::LinkType(d) => vec![d.source.as_str(), d.target.as_str()],
        }
    }

    /// Compare two definitions ignoring the `version` counter and the order
    /// of set-valued fields
    pub fn same_content(&self, other: &EntityDefinition) -> bool {
        self.normalized() == other.normalized()
    }

    fn normalized(&self) -> EntityDefinition {
        let mut entity = self.clone();
        entity.set_version(0);
        match &mut entity {
            EntityDefinition::ObjectType(d) => {
                d.properties.sort();
                d.interfaces.sort();
            }
            EntityDefinition::Property(d) => {
                if let Some(values) = d.constraints.allowed_values.as_mut() {
                    values.sort();
                }
            }
            EntityDefinition::LinkType(_) => {}
        }
        entity
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_entity_json_is_tagged_by_kind() {
        let entity = object_type("Invoice", "Invoice");
        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(value["kind"], "object_type");
        assert_eq!(value["api_name"], "Invoice");

        let back: EntityDefinition = serde_json::from_value(value).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn test_same_content_ignores_version() {
        let a = string_property("Invoice.number", "Invoice", Some(10), true);
        let mut b = a.clone();
        b.set_version(7);
        assert!(a.same_content(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_same_content_ignores_set_order() {
        let mut a = object_type("Invoice", "Invoice");
        let mut b = a.clone();
        if let (EntityDefinition::ObjectType(x), EntityDefinition::ObjectType(y)) = (&mut a, &mut b) {
            x.properties = vec!["number".to_string(), "total".to_string()];
            y.properties = vec!["total".to_string(), "number".to_string()];
        }
        assert!(a.same_content(&b));
    }
}
