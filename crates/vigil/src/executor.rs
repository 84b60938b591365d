//! Transactional execution.
//!
//! Every request runs in its own transaction on its own connection:
//!
//! ```text
//! query:    BEGIN, pre_query hooks, [EXPLAIN], SELECT, COMMIT
//! mutation: BEGIN, pre_query hooks, INSERT/UPDATE/DELETE, [id],
//!           [EXPLAIN, re-fetch], pre_commit hooks, COMMIT, post_commit hooks
//! ```
//!
//! Any failure before `COMMIT` rolls back. SQL is built before a connection
//! is taken, so invalid requests never touch the pool. The transaction body
//! runs on its own task: a caller that goes away doesn't abandon it halfway.

use std::future::Future;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, error, warn};
use vigil_compiler::{CompiledSchema, MutationReturn, Operation};

use crate::error::{Error, RuntimeQueryError};
use crate::hooks::{HookInfo, RequestContext};
use crate::pool::ConnectionProvider;
use crate::query::{
    BuiltMutation, BuiltQuery, FieldSelection, QueryBuilder, ResponseShape, Row, Value,
    build_mutation, last_generated_id,
};
use crate::runtime::RuntimeConfig;
use crate::traced::Connection;

/// A query's JSON response.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub data: String,
    /// Whether the caller's AUTH views were read
    pub auth_required: bool,
}

/// A mutation's response.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResponse {
    /// Id of the affected entity
    pub id: Option<String>,
    /// The re-fetched entity as JSON. `None` for id-only mutations, or when
    /// the caller cannot read the entity back.
    pub data: Option<String>,
}

/// Runs queries and mutations against a compiled schema.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

struct Inner {
    schema: Arc<CompiledSchema>,
    runtime: RuntimeConfig,
    provider: Arc<dyn ConnectionProvider>,
}

impl Executor {
    pub fn new(
        schema: Arc<CompiledSchema>,
        runtime: RuntimeConfig,
        provider: Arc<dyn ConnectionProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                schema,
                runtime,
                provider,
            }),
        }
    }

    pub fn schema(&self) -> &CompiledSchema {
        &self.inner.schema
    }

    /// Run the list query `name`.
    pub async fn query(
        &self,
        context: RequestContext,
        name: &str,
        selection: FieldSelection,
    ) -> crate::Result<QueryResponse> {
        let built = QueryBuilder::new(
            &self.inner.schema,
            &self.inner.runtime.operators,
            context.is_authenticated(),
        )
        .query(name, &selection)?;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run_query(context, built).await }).await?
    }

    /// Run mutation `name`. `selection` picks the fields of the re-fetched
    /// entity; an empty selection re-fetches the id only.
    pub async fn mutate(
        &self,
        context: RequestContext,
        name: &str,
        input: IndexMap<String, Value>,
        selection: FieldSelection,
    ) -> crate::Result<MutationResponse> {
        let built = build_mutation(&self.inner.schema, name, &input)?;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run_mutation(context, built, selection).await }).await?
    }
}

impl Inner {
    async fn run_query(&self, context: RequestContext, built: BuiltQuery) -> crate::Result<QueryResponse> {
        let conn = self.provider.acquire().await?;
        let conn = conn.as_ref();

        let data = transaction(conn, async {
            self.runtime
                .hooks
                .pre_query(conn, &context, built.auth_required)
                .await?;
            self.check_cost(conn, &built).await?;
            let rows = conn.query(&built.sql, &built.params).await?;
            let data = response(rows, &built)?;
            Ok(data.unwrap_or_else(|| "null".to_string()))
        })
        .await?;

        Ok(QueryResponse {
            data,
            auth_required: built.auth_required,
        })
    }

    async fn run_mutation(
        &self,
        context: RequestContext,
        built: BuiltMutation,
        selection: FieldSelection,
    ) -> crate::Result<MutationResponse> {
        let conn = self.provider.acquire().await?;
        let conn = conn.as_ref();
        let hooks = &self.runtime.hooks;

        let (response, info) = transaction(conn, async {
            hooks
                .pre_query(conn, &context, context.is_authenticated())
                .await?;

            let affected = conn.execute(&built.sql, &built.params).await?;
            if affected == 0 {
                return Err(Error::MutationConflict);
            }
            debug!(mutation = %built.mutation, affected, "mutation applied");

            let id = match &built.id {
                Some(id) => Some(id_string(id)),
                None if built.operation == Operation::Create => self.generated_id(conn).await?,
                None => None,
            };
            let data = match (built.returns, &id) {
                (MutationReturn::Entity, Some(id)) => {
                    self.refetch(conn, &context, &built, id, &selection).await?
                }
                _ => None,
            };

            let info = HookInfo {
                mutation: built.mutation.clone(),
                entity: built.entity.clone(),
                operation: built.operation,
                entity_id: id.clone(),
                return_data: data.clone(),
            };
            hooks.pre_commit(conn, &info).await?;
            Ok((MutationResponse { id, data }, info))
        })
        .await?;

        hooks.post_commit(&info, &context).await?;
        Ok(response)
    }

    /// Consult the planner for queries whose shape suggests they may be
    /// expensive. Over-ceiling queries are logged, not refused.
    async fn check_cost(&self, conn: &dyn Connection, built: &BuiltQuery) -> crate::Result<()> {
        if !built.cost.needs_check(&self.runtime.cost) {
            return Ok(());
        }
        let estimate = self
            .runtime
            .cost_estimator
            .estimate(conn, &built.sql, &built.params)
            .await?;
        match estimate {
            Some(cost) if cost > self.runtime.cost.ceiling => warn!(
                cost,
                ceiling = self.runtime.cost.ceiling,
                depth = built.cost.depth,
                fan_out = built.cost.fan_out,
                query = %built.response_column,
                "query cost above ceiling"
            ),
            Some(cost) => debug!(cost, query = %built.response_column, "query cost"),
            None => debug!(query = %built.response_column, "no cost estimate"),
        }
        Ok(())
    }

    async fn generated_id(&self, conn: &dyn Connection) -> crate::Result<Option<String>> {
        let sql = last_generated_id(&self.runtime.views.last_generated_id);
        let rows = conn.query(&sql, &[]).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .and_then(|(_, value)| (!value.is_null()).then(|| id_string(&value))))
    }

    /// Read the mutated entity back through the caller's READ views, inside
    /// the mutation's transaction.
    async fn refetch(
        &self,
        conn: &dyn Connection,
        context: &RequestContext,
        built: &BuiltMutation,
        id: &str,
        selection: &FieldSelection,
    ) -> crate::Result<Option<String>> {
        let selection = if selection.fields.is_empty() {
            FieldSelection::new().field("id")
        } else {
            selection.clone()
        };
        let builder = QueryBuilder::new(
            &self.schema,
            &self.runtime.operators,
            context.is_authenticated(),
        );
        let lookup = match builder.lookup(&built.entity, Value::from(id), &selection) {
            Ok(lookup) => lookup,
            Err(
                RuntimeQueryError::NoReadableView { entity, .. }
                | RuntimeQueryError::Unauthorized { entity, .. },
            ) => {
                debug!(%entity, mutation = %built.mutation, "entity not readable after mutation");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        self.check_cost(conn, &lookup).await?;
        let rows = conn.query(&lookup.sql, &lookup.params).await?;
        response(rows, &lookup)
    }
}

/// Run `body` between `BEGIN` and `COMMIT`, rolling back if it fails.
async fn transaction<T>(
    conn: &dyn Connection,
    body: impl Future<Output = crate::Result<T>>,
) -> crate::Result<T> {
    conn.batch_execute("BEGIN").await?;
    match body.await {
        Ok(value) => {
            conn.batch_execute("COMMIT").await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = conn.batch_execute("ROLLBACK").await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

/// The generated statements always answer with exactly one row holding one
/// JSON column, and never echo their own placeholders. Anything else
/// means the statement isn't the one we built.
fn response(rows: Vec<Row>, built: &BuiltQuery) -> crate::Result<Option<String>> {
    let suspicious = |reason: String| {
        error!(column = %built.response_column, sql = %built.sql, %reason, "unexpected response");
        Error::InjectionSuspicion(reason)
    };

    let [row] = <[Row; 1]>::try_from(rows)
        .map_err(|rows| suspicious(format!("expected 1 row, got {}", rows.len())))?;
    let [(column, value)] = <[(String, Value); 1]>::try_from(row)
        .map_err(|row| suspicious(format!("expected 1 column, got {}", row.len())))?;
    if column != built.response_column {
        return Err(suspicious(format!(
            "expected column '{}', got '{column}'",
            built.response_column
        )));
    }
    match (value, built.shape) {
        (Value::Json(json), _) => match leaked_artifact(&json, built) {
            Some(reason) => Err(suspicious(reason)),
            None => Ok(Some(json)),
        },
        (Value::Null, ResponseShape::Single) => Ok(None),
        (other, _) => Err(suspicious(format!("expected JSON, got {other}"))),
    }
}

/// One of the statement's own placeholders (`"$2"`) showing up as a value.
fn leaked_artifact(json: &str, built: &BuiltQuery) -> Option<String> {
    (1..=built.params.len())
        .map(|n| format!("\"${n}\""))
        .find(|placeholder| json.contains(placeholder.as_str()))
        .map(|placeholder| format!("payload contains placeholder {placeholder}"))
}

fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests;
