use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use std::fmt;

/// Database schema as declared by the user's data model.
///
/// This describes the abstract lists and fields, not how the migration engine
/// actually materializes them in the database. A snapshot is immutable once
/// written; a new schema version is always a full replacement, never a patch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// All lists, keyed by list name, serialized as an array.
    #[serde(with = "snapshot_lists")]
    pub lists: IndexMap<String, ListSpec>,
}

/// A named collection of typed fields (a table/entity).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSpec {
    pub name: String,
    #[serde(default)]
    pub options: ListOptions,
    /// Fields in declaration order. Field names are unique within a list.
    #[serde(with = "list_fields")]
    pub fields: IndexMap<String, FieldSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOptions {
    /// Overrides the physical table name; defaults to the list name. Only
    /// list create/remove honor the override; field and relationship DDL
    /// always address the list by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
}

/// One scalar or relationship field of a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: FieldType,
    /// Type-specific settings (required, unique, indexed, default value, data
    /// type, precision, ...). Open-ended on purpose: third-party field kinds
    /// bring their own keys.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub options: IndexMap<String, serde_json::Value>,
    /// Replay log of column-builder calls that materialize this field. Opaque
    /// to the differ, interpreted only by the executor. Empty exactly for
    /// relationship fields without a direct column (N:N and the right side of
    /// a referenced 1:N).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column_spec: Vec<ColumnCall>,
    /// Present iff `type_` is `Relationship`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assoc: Option<AssociationSpec>,
}

/// Field type tag: the name of a scalar field kind, or `Relationship`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Scalar(String),
    Relationship,
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Scalar(name) => name,
            FieldType::Relationship => "Relationship",
        }
    }

    pub fn is_relationship(&self) -> bool {
        matches!(self, FieldType::Relationship)
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        if name.is_empty() {
            return Err(de::Error::custom("field type must not be empty"));
        }
        Ok(match name.as_str() {
            "Relationship" => FieldType::Relationship,
            _ => FieldType::Scalar(name),
        })
    }
}

/// One recorded column-builder call: method name, its arguments and the
/// chained modifier calls. The first argument is the physical column name by
/// convention of the column builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnCall {
    pub method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<Modifier>,
}

/// A chained modifier on a column-builder call (`notNullable`, `unique`,
/// `defaultTo(x)`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modifier {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<serde_json::Value>,
}

impl ColumnCall {
    pub fn new(method: &str, args: Vec<serde_json::Value>) -> Self {
        Self { method: method.into(), args, modifiers: Vec::new() }
    }

    /// The physical column name this call produces.
    pub fn column_name(&self) -> Option<&str> {
        self.args.first().and_then(|arg| arg.as_str())
    }

    pub fn modifier(&self, name: &str) -> Option<&Modifier> {
        self.modifiers.iter().find(|m| m.name == name)
    }

    pub fn has_modifier(&self, name: &str) -> bool {
        self.modifier(name).is_some()
    }
}

/// The relationship facet of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationSpec {
    pub cardinality: Cardinality,
    /// The declaring (owning) side.
    pub left: SideRef,
    /// The other side. `field` names the reciprocal field when the
    /// relationship is declared from both lists; it is absent for standalone
    /// relationships.
    pub right: TargetRef,
}

impl AssociationSpec {
    /// True when the relationship is declared with a reciprocal field on the
    /// other list, as opposed to standalone.
    pub fn referenced(&self) -> bool {
        self.right.field.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideRef {
    pub list: String,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    pub list: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Relationship multiplicity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    #[serde(rename = "1:1")]
    OneToOne,
    #[serde(rename = "1:N")]
    OneToMany,
    #[serde(rename = "N:1")]
    ManyToOne,
    #[serde(rename = "N:N")]
    ManyToMany,
}

impl Cardinality {
    pub fn as_str(self) -> &'static str {
        match self {
            Cardinality::OneToOne => "1:1",
            Cardinality::OneToMany => "1:N",
            Cardinality::ManyToOne => "N:1",
            Cardinality::ManyToMany => "N:N",
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ListSpec {
    /// The physical table name backing this list.
    pub fn table_name(&self) -> &str {
        self.options.table_name.as_deref().unwrap_or(&self.name)
    }
}

crate::serde_map_as_vec!(mod snapshot_lists, IndexMap<String, ListSpec>, name);
crate::serde_map_as_vec!(mod list_fields, IndexMap<String, FieldSpec>, name);
