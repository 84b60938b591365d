//! Permission definitions.

use std::fmt;

use crate::ast::Params;

/// What a permission allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Read => "READ",
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }

    pub fn is_mutation(self) -> bool {
        !matches!(self, Operation::Read)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named use of a registered expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionRef {
    pub name: String,
    pub params: Params,
}

impl ExpressionRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Params::new(),
        }
    }

    pub fn with_params(name: impl Into<String>, params: Params) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// Binds one entity, one operation, an allowed field set and row-visibility
/// expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct Permission {
    /// Entity (type) name
    pub entity: String,
    /// View name, unique per entity and operation
    pub name: String,
    pub operation: Operation,
    /// Allowed field names; READ permissions may use dotted paths into `@json` fields
    pub fields: Vec<String>,
    /// Rows are visible if any of these hold
    pub expressions: Vec<ExpressionRef>,
    /// Mutations answer with the entity id only instead of re-reading the row
    pub return_only_id: bool,
}

impl Permission {
    pub fn new(
        entity: impl Into<String>,
        name: impl Into<String>,
        operation: Operation,
        fields: &[&str],
    ) -> Self {
        Self {
            entity: entity.into(),
            name: name.into(),
            operation,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            expressions: Vec::new(),
            return_only_id: false,
        }
    }

    pub fn expression(mut self, expr: ExpressionRef) -> Self {
        self.expressions.push(expr);
        self
    }
}
