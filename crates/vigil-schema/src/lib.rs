//! Schema IR for vigil.
//!
//! This crate contains the canonical schema tree shared between the compiler
//! (which builds it from entity definitions) and the migration differ (which
//! compares two of them). The IR is rebuilt from scratch on every compile pass.

use indexmap::IndexMap;
use std::fmt;

mod tree;
pub use tree::*;

/// Postgres column types the IR knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgType {
    /// INTEGER (4 bytes)
    Integer,
    /// BIGINT (8 bytes)
    BigInt,
    /// DOUBLE PRECISION (8 bytes floating point)
    DoublePrecision,
    /// BOOLEAN
    Boolean,
    /// CHARACTER VARYING
    Varchar,
    /// TEXT
    Text,
    /// TIMESTAMPTZ
    Timestamptz,
    /// DATE
    Date,
    /// UUID
    Uuid,
    /// UUID[] (array of ids, used by many-to-many relation columns)
    UuidArray,
    /// JSONB
    Jsonb,
    /// A user-defined enum; the enum name lives in [`Column::custom_type`].
    Enum,
}

impl fmt::Display for PgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgType::Integer => write!(f, "INTEGER"),
            PgType::BigInt => write!(f, "BIGINT"),
            PgType::DoublePrecision => write!(f, "DOUBLE PRECISION"),
            PgType::Boolean => write!(f, "BOOLEAN"),
            PgType::Varchar => write!(f, "CHARACTER VARYING"),
            PgType::Text => write!(f, "TEXT"),
            PgType::Timestamptz => write!(f, "TIMESTAMPTZ"),
            PgType::Date => write!(f, "DATE"),
            PgType::Uuid => write!(f, "UUID"),
            PgType::UuidArray => write!(f, "UUID[]"),
            PgType::Jsonb => write!(f, "JSONB"),
            PgType::Enum => write!(f, "USER-DEFINED"),
        }
    }
}

/// The whole schema: tables grouped by schema, plus enums and relations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbMeta {
    pub schemas: IndexMap<String, Schema>,
    pub enums: IndexMap<String, Enum>,
    pub relations: IndexMap<String, Relation>,
}

impl DbMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the schema describes nothing at all.
    pub fn is_empty(&self) -> bool {
        self.schemas.values().all(|s| s.tables.is_empty()) && self.enums.is_empty()
    }

    /// Insert a table, creating its schema on first use.
    pub fn add_table(&mut self, table: Table) {
        let schema = self
            .schemas
            .entry(table.schema_name.clone())
            .or_insert_with(|| Schema::new(table.schema_name.clone()));
        schema.tables.insert(table.name.clone(), table);
    }

    pub fn table(&self, schema: &str, name: &str) -> Option<&Table> {
        self.schemas.get(schema)?.tables.get(name)
    }

    pub fn table_mut(&mut self, schema: &str, name: &str) -> Option<&mut Table> {
        self.schemas.get_mut(schema)?.tables.get_mut(name)
    }

    /// Iterate over every table in every schema.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.schemas.values().flat_map(|s| s.tables.values())
    }
}

/// A Postgres schema (namespace).
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub name: String,
    pub tables: IndexMap<String, Table>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: IndexMap::new(),
        }
    }
}

/// A database table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Table name
    pub name: String,
    /// Schema the table lives in
    pub schema_name: String,
    /// Previous name, when the table is being renamed
    pub old_name: Option<String>,
    /// Previous schema, when the table is being moved
    pub old_schema_name: Option<String>,
    /// Description (from the entity's doc comment)
    pub description: Option<String>,
    /// Columns in declaration order
    pub columns: IndexMap<String, Column>,
    /// Constraints keyed by constraint name
    pub constraints: IndexMap<String, Constraint>,
}

impl Table {
    pub fn new(schema_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema_name: schema_name.into(),
            old_name: None,
            old_schema_name: None,
            description: None,
            columns: IndexMap::new(),
            constraints: IndexMap::new(),
        }
    }

    pub fn add_column(&mut self, column: Column) {
        self.columns.insert(column.name.clone(), column);
    }

    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.insert(constraint.name.clone(), constraint);
    }

    /// Columns covered by the primary key constraint.
    pub fn primary_key(&self) -> Option<&[String]> {
        self.constraints
            .values()
            .find(|c| c.kind == ConstraintKind::PrimaryKey)
            .map(|c| c.columns.as_slice())
    }
}

/// A database column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Previous name, when the column is being renamed
    pub old_name: Option<String>,
    /// Postgres type
    pub pg_type: PgType,
    /// Enum type name, for [`PgType::Enum`] columns
    pub custom_type: Option<String>,
    /// Whether the column allows NULL
    pub nullable: bool,
    /// Default value expression (if any)
    pub default: Option<String>,
    /// Description (from the field's doc comment)
    pub description: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, pg_type: PgType) -> Self {
        Self {
            name: name.into(),
            old_name: None,
            pg_type,
            custom_type: None,
            nullable: true,
            default: None,
            description: None,
        }
    }

    /// An enum-typed column.
    pub fn enumeration(name: impl Into<String>, enum_name: impl Into<String>) -> Self {
        Self {
            custom_type: Some(enum_name.into()),
            ..Self::new(name, PgType::Enum)
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// The type as written in a cast: `UUID`, `"TaskStatus"`, ...
    pub fn sql_type(&self) -> String {
        match (self.pg_type, &self.custom_type) {
            (PgType::Enum, Some(name)) => vigil_sql::quote_ident(name),
            (pg_type, _) => pg_type.to_string(),
        }
    }
}

/// Kinds of table constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
}

impl ConstraintKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConstraintKind::PrimaryKey => "PRIMARY KEY",
            ConstraintKind::Unique => "UNIQUE",
            ConstraintKind::ForeignKey => "FOREIGN KEY",
            ConstraintKind::Check => "CHECK",
        }
    }
}

/// A table constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    /// Referenced column, for foreign keys
    pub references: Option<ColumnPointer>,
    /// Boolean SQL expression, for checks
    pub expression: Option<String>,
}

impl Constraint {
    pub fn primary_key(table: &str, columns: Vec<String>) -> Self {
        Self {
            name: vigil_sql::primary_key_name(table),
            kind: ConstraintKind::PrimaryKey,
            columns,
            references: None,
            expression: None,
        }
    }

    pub fn unique(table: &str, column: &str) -> Self {
        Self {
            name: vigil_sql::unique_key_name(table, column),
            kind: ConstraintKind::Unique,
            columns: vec![column.to_string()],
            references: None,
            expression: None,
        }
    }

    pub fn foreign_key(table: &str, column: &str, references: ColumnPointer) -> Self {
        Self {
            name: vigil_sql::foreign_key_name(table, column),
            kind: ConstraintKind::ForeignKey,
            columns: vec![column.to_string()],
            references: Some(references),
            expression: None,
        }
    }
}

/// Points at one column of one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnPointer {
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
}

impl ColumnPointer {
    pub fn new(
        schema_name: impl Into<String>,
        table_name: impl Into<String>,
        column_name: impl Into<String>,
    ) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            column_name: column_name.into(),
        }
    }

    /// `schema.table.column`
    pub fn key(&self) -> String {
        format!("{}.{}.{}", self.schema_name, self.table_name, self.column_name)
    }
}

/// A user-defined enum type.
#[derive(Debug, Clone, PartialEq)]
pub struct Enum {
    pub name: String,
    /// Values in declaration order
    pub values: Vec<String>,
    /// Columns typed with this enum
    pub columns: Vec<ColumnPointer>,
}

impl Enum {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
            columns: Vec::new(),
        }
    }
}

/// Relation cardinality on one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

impl Cardinality {
    pub fn as_str(self) -> &'static str {
        match self {
            Cardinality::One => "ONE",
            Cardinality::Many => "MANY",
        }
    }
}

/// A named relation between two tables, one side per declaring field.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub name: String,
    /// Sides keyed by [`RelationSide::key`]
    pub sides: IndexMap<String, RelationSide>,
}

impl Relation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sides: IndexMap::new(),
        }
    }

    pub fn add_side(&mut self, side: RelationSide) {
        self.sides.insert(side.key(), side);
    }

    /// The side declared by `schema.table.field` ("own") and the other one ("foreign").
    pub fn split(
        &self,
        schema: &str,
        table: &str,
        field: &str,
    ) -> Option<(&RelationSide, &RelationSide)> {
        let own_key = format!("{schema}.{table}.{field}");
        let own = self.sides.get(&own_key)?;
        let foreign = self.sides.iter().find(|(key, _)| **key != own_key)?.1;
        Some((own, foreign))
    }
}

/// One side of a relation, as declared by a field on an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationSide {
    pub schema_name: String,
    pub table_name: String,
    /// The entity field declaring the relation
    pub field_name: String,
    pub cardinality: Cardinality,
    /// Column holding the foreign id(s), when this side owns one
    pub column_name: Option<String>,
    pub foreign_schema_name: String,
    pub foreign_table_name: String,
}

impl RelationSide {
    /// `schema.table.field`
    pub fn key(&self) -> String {
        format!("{}.{}.{}", self.schema_name, self.table_name, self.field_name)
    }
}
