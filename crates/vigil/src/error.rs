use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("timed out waiting for a database connection")]
    PoolTimeout,

    #[error(transparent)]
    RuntimeQuery(#[from] RuntimeQueryError),

    #[error(
        "No rows affected by this mutation. Either the entity does not exist or you are not permitted."
    )]
    MutationConflict,

    /// The response did not have the shape the generated statement guarantees.
    #[error("unexpected query response: {0}")]
    InjectionSuspicion(String),

    #[error("hook '{hook}' failed: {message}")]
    Hook { hook: String, message: String },

    #[error("column '{column}' has unsupported type {ty}")]
    UnsupportedColumn { column: String, ty: String },

    #[error("failed to read column '{column}': {message}")]
    ColumnRead { column: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("request task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// A failure raised by a hook.
    pub fn hook(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Hook {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

/// A request the compiled catalogs cannot serve.
///
/// These are raised while building SQL, before any connection is taken.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeQueryError {
    #[error("query '{0}' does not exist")]
    UnknownQuery(String),

    #[error("mutation '{0}' does not exist")]
    UnknownMutation(String),

    #[error("field '{field}' does not exist on {entity}")]
    UnknownField { entity: String, field: String },

    #[error("field '{field}' on {entity} requires authentication")]
    Unauthorized { entity: String, field: String },

    #[error("no view of {entity} exposes all of: {}", fields.join(", "))]
    NoReadableView { entity: String, fields: Vec<String> },

    #[error("relation '{field}' on {entity} cannot be resolved")]
    UnresolvableRelation { entity: String, field: String },

    #[error("field '{field}' on {entity} is a relation and needs a sub-selection")]
    MissingSubSelection { entity: String, field: String },

    #[error("relation '{field}' on {entity} cannot be filtered or ordered on")]
    RelationNotComparable { entity: String, field: String },

    #[error("selection on {entity} is empty")]
    EmptySelection { entity: String },

    #[error("field '{field}' on {entity} is not a relation")]
    NotARelation { entity: String, field: String },

    #[error("Operator '{0}' not found.")]
    OperatorNotFound(String),

    #[error("BooleanOperator '{0}' requires a single value.")]
    BooleanOperatorValue(String),

    #[error("SingleValueOperator '{0}' requires a single value.")]
    SingleValueOperatorValue(String),

    #[error("MultiValueOperator '{0}' requires an array of values.")]
    MultiValueOperatorValue(String),

    #[error("'{value}' is not a valid value for operator '{operator}'")]
    InvalidOperatorValue { operator: String, value: String },

    #[error("mutation '{mutation}' has no input field '{field}'")]
    UnknownInputField { mutation: String, field: String },

    #[error("mutation '{mutation}' requires an 'id' input")]
    MissingId { mutation: String },

    #[error("mutation '{mutation}' has nothing to write")]
    EmptyInput { mutation: String },
}
