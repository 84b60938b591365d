//! Schema compiler for vigil.
//!
//! Turns an entity definition document, a list of permissions and an
//! expression registry into:
//!
//! - the desired database structure ([`vigil_schema::DbMeta`]),
//! - authorization views (`CREATE OR REPLACE VIEW … WITH (security_barrier)`),
//! - the aggregate read types and the query/mutation catalogs the runtime
//!   builds SQL from.
//!
//! ```ignore
//! let config = CompilerConfig::new(ViewConfig::default(), expressions);
//! let schema = vigil_compiler::compile(&document, &permissions, &config)?;
//! for statement in schema.statements() {
//!     client.batch_execute(statement).await?;
//! }
//! ```

pub mod ast;
pub mod compile;
pub mod config;
pub mod error;
pub mod expression;
pub mod ir;
pub mod permission;
pub mod view;

#[cfg(test)]
mod testing;

pub use compile::{
    CompiledSchema, CustomFieldBinding, EntityType, MutationDef, MutationReturn, QueryDef,
    ReadViewRef, RelationInfo, ViewRef, compile,
};
pub use config::CompilerConfig;
pub use error::{CompileError, ViewSkip};
pub use expression::{
    ExpressionContext, ExpressionDef, ExpressionRegistry, Fragment, LOCAL_TABLE_ALIAS,
};
pub use permission::{ExpressionRef, Operation, Permission};
pub use view::{CompiledView, InputField, VIEWNAMES_FIELD, ViewField, ViewVariant};
