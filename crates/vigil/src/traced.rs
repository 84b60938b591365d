//! Traced database connections.
//!
//! Every statement the runtime issues goes through [`Connection`], which logs
//! it in a `db.query` / `db.execute` span.

use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;

use tokio_postgres::types::ToSql;
use tracing::Instrument;

use crate::query::{Row, SqlParam, Value, pg_row_to_row};

/// A boxed, sendable future borrowing from `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A database connection the runtime can issue statements on.
///
/// Implemented for `deadpool_postgres::Object`. Hooks receive a `&dyn
/// Connection` so they can run their own statements inside the request's
/// transaction.
pub trait Connection: Send + Sync {
    /// Execute a statement, returning the number of rows affected.
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, crate::Result<u64>>;

    /// Execute a query, returning all rows.
    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, crate::Result<Vec<Row>>>;

    /// Run parameterless statements (`BEGIN`, `COMMIT`, `ROLLBACK`).
    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, crate::Result<()>>;
}

fn sql_params(params: &[Value]) -> Vec<SqlParam<'_>> {
    params.iter().map(SqlParam).collect()
}

impl Connection for deadpool_postgres::Object {
    fn execute<'a>(&'a self, sql: &'a str, params: &'a [Value]) -> BoxFuture<'a, crate::Result<u64>> {
        // Deref to the underlying Client to avoid recursion
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(async move {
            let span = tracing::debug_span!(
                "db.execute",
                sql = %sql,
                params = params.len(),
                affected = tracing::field::Empty,
            );
            let bound = sql_params(params);
            let refs: Vec<&(dyn ToSql + Sync)> =
                bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
            let affected = client.execute(sql, &refs).instrument(span.clone()).await?;
            span.record("affected", affected);
            Ok(affected)
        })
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, crate::Result<Vec<Row>>> {
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(async move {
            let span = tracing::debug_span!(
                "db.query",
                sql = %sql,
                params = params.len(),
                rows = tracing::field::Empty,
            );
            let bound = sql_params(params);
            let refs: Vec<&(dyn ToSql + Sync)> =
                bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
            let rows = client.query(sql, &refs).instrument(span.clone()).await?;
            span.record("rows", rows.len());
            rows.iter().map(pg_row_to_row).collect()
        })
    }

    fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, crate::Result<()>> {
        let client: &tokio_postgres::Client = self.deref();
        Box::pin(async move {
            let span = tracing::debug_span!("db.execute", sql = %sql);
            client.batch_execute(sql).instrument(span).await?;
            Ok(())
        })
    }
}
