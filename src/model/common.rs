use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DataType {
    String,
    Integer,
    Double,
    Boolean,
    Date,
    Timestamp,
    Struct,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    #[default]
    Draft,
    Active,
    Archived,
}

/// Link cardinality. Each side is either "one" or "many"; a relaxation never
/// turns a "many" side back into "one".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl Cardinality {
    /// (source side is many, target side is many)
    pub fn sides(&self) -> (bool, bool) {
        match self {
            Cardinality::OneToOne => (false, false),
            Cardinality::OneToMany => (false, true),
            Cardinality::ManyToOne => (true, false),
            Cardinality::ManyToMany => (true, true),
        }
    }

    pub fn from_sides(source_many: bool, target_many: bool) -> Self {
        match (source_many, target_many) {
            (false, false) => Cardinality::OneToOne,
            (false, true) => Cardinality::OneToMany,
            (true, false) => Cardinality::ManyToOne,
            (true, true) => Cardinality::ManyToMany,
        }
    }

    /// True if `other` is at least as permissive as `self` on both sides.
    pub fn is_relaxed_by(&self, other: &Cardinality) -> bool {
        let (s_src, s_tgt) = self.sides();
        let (o_src, o_tgt) = other.sides();
        (!s_src || o_src) && (!s_tgt || o_tgt)
    }

    /// Least restrictive cardinality admitting both inputs.
    pub fn join(&self, other: &Cardinality) -> Cardinality {
        let (a_src, a_tgt) = self.sides();
        let (b_src, b_tgt) = other.sides();
        Cardinality::from_sides(a_src || b_src, a_tgt || b_tgt)
    }
}

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Checks the api name grammar: a leading ASCII letter followed by letters,
/// digits, `_`, `.` or `-`.
pub fn is_valid_api_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        }
        _ => false,
    }
}
