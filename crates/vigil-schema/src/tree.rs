//! Generic keyed-tree view of the IR.
//!
//! The migration differ walks schemas structurally, so the typed IR is
//! lowered into nested string-keyed objects with scalar leaves. Optional
//! values are kept as explicit [`Scalar::Null`] leaves, lists become objects
//! keyed by position.

use indexmap::IndexMap;
use std::fmt;

use crate::{Column, Constraint, DbMeta, Enum, Relation, RelationSide, Table};

pub const NAME: &str = "name";
pub const OLD_NAME: &str = "oldName";
pub const OLD_SCHEMA_NAME: &str = "oldSchemaName";
pub const SCHEMA_NAME: &str = "schemaName";
pub const TABLE_NAME: &str = "tableName";
pub const COLUMN_NAME: &str = "columnName";
pub const FOREIGN_SCHEMA_NAME: &str = "foreignSchemaName";
pub const FOREIGN_TABLE_NAME: &str = "foreignTableName";
pub const SCHEMAS: &str = "schemas";
pub const TABLES: &str = "tables";
pub const COLUMNS: &str = "columns";
pub const CONSTRAINTS: &str = "constraints";
pub const ENUMS: &str = "enums";
pub const VALUES: &str = "values";
pub const RELATIONS: &str = "relations";
pub const SIDES: &str = "sides";
pub const TYPE: &str = "type";
pub const CUSTOM_TYPE: &str = "customType";

/// A leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(n) => write!(f, "{n}"),
            Scalar::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Str(s)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Scalar::Null)
    }
}

/// A node of the keyed tree: either a scalar leaf or an ordered object.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaNode {
    Scalar(Scalar),
    Object(IndexMap<String, MetaNode>),
}

impl Default for MetaNode {
    fn default() -> Self {
        MetaNode::Object(IndexMap::new())
    }
}

impl MetaNode {
    pub fn scalar(value: impl Into<Scalar>) -> Self {
        MetaNode::Scalar(value.into())
    }

    /// Build an object node from key/value pairs.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, MetaNode)>) -> Self {
        MetaNode::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, MetaNode>> {
        match self {
            MetaNode::Object(map) => Some(map),
            MetaNode::Scalar(_) => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut IndexMap<String, MetaNode>> {
        match self {
            MetaNode::Object(map) => Some(map),
            MetaNode::Scalar(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            MetaNode::Scalar(s) => Some(s),
            MetaNode::Object(_) => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetaNode> {
        self.as_object()?.get(key)
    }

    /// Follow a path of keys from this node.
    pub fn get_path(&self, path: &[&str]) -> Option<&MetaNode> {
        path.iter().try_fold(self, |node, key| node.get(key))
    }

    /// String value of a scalar child, if present and not null.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_scalar()?.as_str()
    }
}

fn list<T>(items: &[T], f: impl Fn(&T) -> MetaNode) -> MetaNode {
    MetaNode::Object(
        items
            .iter()
            .enumerate()
            .map(|(i, item)| (i.to_string(), f(item)))
            .collect(),
    )
}

impl DbMeta {
    /// Lower the IR into a keyed tree for structural diffing.
    pub fn to_tree(&self) -> MetaNode {
        let schemas = self.schemas.values().map(|schema| {
            let tables = schema
                .tables
                .values()
                .map(|t| (t.name.clone(), t.to_tree()));
            (
                schema.name.clone(),
                MetaNode::object([
                    (NAME, MetaNode::scalar(schema.name.as_str())),
                    (TABLES, MetaNode::object(tables)),
                ]),
            )
        });
        let enums = self.enums.values().map(|e| (e.name.clone(), e.to_tree()));
        let relations = self
            .relations
            .values()
            .map(|r| (r.name.clone(), r.to_tree()));

        MetaNode::object([
            (SCHEMAS, MetaNode::object(schemas)),
            (ENUMS, MetaNode::object(enums)),
            (RELATIONS, MetaNode::object(relations)),
        ])
    }
}

impl Table {
    pub fn to_tree(&self) -> MetaNode {
        let columns = self.columns.values().map(|c| (c.name.clone(), c.to_tree()));
        let constraints = self
            .constraints
            .values()
            .map(|c| (c.name.clone(), c.to_tree()));
        MetaNode::object([
            (NAME, MetaNode::scalar(self.name.as_str())),
            (SCHEMA_NAME, MetaNode::scalar(self.schema_name.as_str())),
            (OLD_NAME, MetaNode::scalar(self.old_name.clone())),
            (OLD_SCHEMA_NAME, MetaNode::scalar(self.old_schema_name.clone())),
            ("description", MetaNode::scalar(self.description.clone())),
            (COLUMNS, MetaNode::object(columns)),
            (CONSTRAINTS, MetaNode::object(constraints)),
        ])
    }
}

impl Column {
    pub fn to_tree(&self) -> MetaNode {
        MetaNode::object([
            (NAME, MetaNode::scalar(self.name.as_str())),
            (OLD_NAME, MetaNode::scalar(self.old_name.clone())),
            (TYPE, MetaNode::scalar(self.pg_type.to_string())),
            (CUSTOM_TYPE, MetaNode::scalar(self.custom_type.clone())),
            ("nullable", MetaNode::scalar(self.nullable)),
            ("default", MetaNode::scalar(self.default.clone())),
            ("description", MetaNode::scalar(self.description.clone())),
        ])
    }
}

impl Constraint {
    pub fn to_tree(&self) -> MetaNode {
        let references = self.references.as_ref();
        MetaNode::object([
            (NAME, MetaNode::scalar(self.name.as_str())),
            (TYPE, MetaNode::scalar(self.kind.as_str())),
            (COLUMNS, list(&self.columns, |c| MetaNode::scalar(c.as_str()))),
            (
                "referencesSchemaName",
                MetaNode::scalar(references.map(|r| r.schema_name.clone())),
            ),
            (
                "referencesTableName",
                MetaNode::scalar(references.map(|r| r.table_name.clone())),
            ),
            (
                "referencesColumnName",
                MetaNode::scalar(references.map(|r| r.column_name.clone())),
            ),
            ("expression", MetaNode::scalar(self.expression.clone())),
        ])
    }
}

impl Enum {
    pub fn to_tree(&self) -> MetaNode {
        let columns = self.columns.iter().map(|ptr| {
            (
                ptr.key(),
                MetaNode::object([
                    (SCHEMA_NAME, MetaNode::scalar(ptr.schema_name.as_str())),
                    (TABLE_NAME, MetaNode::scalar(ptr.table_name.as_str())),
                    (COLUMN_NAME, MetaNode::scalar(ptr.column_name.as_str())),
                ]),
            )
        });
        MetaNode::object([
            (NAME, MetaNode::scalar(self.name.as_str())),
            (VALUES, list(&self.values, |v| MetaNode::scalar(v.as_str()))),
            (COLUMNS, MetaNode::object(columns)),
        ])
    }
}

impl Relation {
    pub fn to_tree(&self) -> MetaNode {
        let sides = self.sides.iter().map(|(key, side)| (key.clone(), side.to_tree()));
        MetaNode::object([
            (NAME, MetaNode::scalar(self.name.as_str())),
            (SIDES, MetaNode::object(sides)),
        ])
    }
}

impl RelationSide {
    pub fn to_tree(&self) -> MetaNode {
        MetaNode::object([
            (NAME, MetaNode::scalar(self.field_name.as_str())),
            (SCHEMA_NAME, MetaNode::scalar(self.schema_name.as_str())),
            (TABLE_NAME, MetaNode::scalar(self.table_name.as_str())),
            (TYPE, MetaNode::scalar(self.cardinality.as_str())),
            (COLUMN_NAME, MetaNode::scalar(self.column_name.clone())),
            (
                FOREIGN_SCHEMA_NAME,
                MetaNode::scalar(self.foreign_schema_name.as_str()),
            ),
            (
                FOREIGN_TABLE_NAME,
                MetaNode::scalar(self.foreign_table_name.as_str()),
            ),
        ])
    }
}
