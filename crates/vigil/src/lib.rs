//! Permission-scoped Postgres access.
//!
//! The compiler ([`vigil_compiler`]) turns entity definitions and permissions
//! into security-barrier views plus query and mutation catalogs. This crate is
//! everything that happens after that:
//!
//! - [`diff`]: compare the live schema against the desired one and produce an
//!   annotated delta tree for the DDL emitter,
//! - [`query`]: turn a client field selection into one parameterized SQL
//!   statement over the compiled views,
//! - [`Executor`]: run that statement inside a transaction with hooks, cost
//!   checks and response validation,
//! - [`pool::ManagedPool`]: a connection pool sized as a fair share of a
//!   cluster-wide connection ceiling.
//!
//! ```ignore
//! let (config, _) = vigil::config::load()?;
//! let pool = ManagedPool::new(config.pool_config())?;
//! let runtime = RuntimeConfig::from_config(&config);
//! let executor = Executor::new(Arc::new(schema), runtime, Arc::new(pool));
//!
//! let selection = FieldSelection::new().field("id").field("title");
//! let response = executor
//!     .query(RequestContext::anonymous(), "tasks", selection)
//!     .await?;
//! println!("{}", response.data);
//! ```

pub mod config;
pub mod cost;
pub mod diff;
mod error;
mod executor;
pub mod hooks;
pub mod pool;
pub mod query;
mod runtime;
mod traced;

#[cfg(test)]
mod testing;

pub use config::ConfigError;
pub use cost::{CostEstimator, ExplainCostEstimator, StaticCost};
pub use diff::{DeltaNode, DiffError, DiffOptions, MigrationAction, apply, diff, diff_trees};
pub use error::{Error, RuntimeQueryError};
pub use executor::{Executor, MutationResponse, QueryResponse};
pub use hooks::{Hook, HookInfo, HookRegistry, RequestContext};
pub use pool::{ConnectionProvider, ManagedPool};
pub use query::{FieldSelection, Filter, OperatorRegistry, QueryArgs, Value};
pub use runtime::RuntimeConfig;
pub use traced::{BoxFuture, Connection};

/// Result type for vigil runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
