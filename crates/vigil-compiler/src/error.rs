//! Compile errors.
//!
//! Any [`CompileError`] aborts the whole pass: a partially compiled schema is
//! never handed out. Permissions that simply produce nothing are reported as a
//! [`ViewSkip`] instead, which is not an error.

use thiserror::Error;

use crate::permission::Operation;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("unknown expression '{name}' (used by {context})")]
    UnknownExpression { name: String, context: String },

    #[error("expression '{name}' failed: {message}")]
    Expression { name: String, message: String },

    #[error("unknown resolver '{resolver}' for custom field {entity}.{field}")]
    UnknownResolver {
        entity: String,
        field: String,
        resolver: String,
    },

    #[error("{operation} permission '{permission}' on {entity} must include field \"id\"")]
    UpdateWithoutPrimaryKey {
        entity: String,
        permission: String,
        operation: Operation,
    },

    #[error("relation '{relation}' is malformed: {reason}")]
    MalformedRelation { relation: String, reason: String },

    #[error("relation '{relation}' on {entity}.{field} targets '{target}', which is not a table entity")]
    UnresolvableRelationTarget {
        entity: String,
        field: String,
        relation: String,
        target: String,
    },

    #[error("field {entity}.{field} has unknown type '{ty}'")]
    UnknownType {
        entity: String,
        field: String,
        ty: String,
    },

    #[error("permission '{permission}' references unknown entity '{entity}'")]
    UnknownEntity { entity: String, permission: String },

    #[error("permission '{permission}' on {entity} references unknown field '{field}'")]
    UnknownField {
        entity: String,
        permission: String,
        field: String,
    },

    #[error("permission '{permission}' on {entity}: '{path}' is not a path into a @json field")]
    InvalidJsonPath {
        entity: String,
        permission: String,
        path: String,
    },

    #[error("duplicate definition '{name}'")]
    DuplicateDefinition { name: String },

    #[error("view '{name}' is defined more than once")]
    DuplicateView { name: String },
}

/// Why a permission compiled to no view at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSkip {
    /// Neither the public nor the auth variant has a usable field.
    NoFields,
    /// No row-visibility expression survived, so nothing would be visible.
    NoExpressions,
}
