//! From client selections to SQL.
//!
//! [`QueryBuilder`] turns a [`FieldSelection`] into one read statement over
//! the caller's views, [`build_mutation`] turns mutation inputs into one write
//! statement over a mutation view. Nothing here touches a connection.

mod mutation;
mod operators;
mod row;
mod select;
mod selection;
mod value;

pub use mutation::{BuiltMutation, build_mutation};
pub(crate) use mutation::last_generated_id;
pub use operators::{Operator, OperatorRegistry};
pub use row::{Row, SqlParam, pg_row_to_row};
pub use select::{BuiltQuery, QueryBuilder, ResponseShape};
pub use selection::{FieldSelection, Filter, OrderField, QueryArgs, SelectedField};
pub use value::Value;
