//! Request hooks.
//!
//! Hooks run inside the request's transaction, on its connection, in
//! registration order:
//!
//! - `pre_query` after `BEGIN`, before the primary statement (queries and
//!   mutations). Typically sets session variables such as the caller's id.
//! - `pre_commit` after a mutation's primary statement and re-fetch, before
//!   `COMMIT`. Failing here rolls the mutation back.
//! - `post_commit` after `COMMIT`. The write is durable by then; a failure is
//!   still reported to the caller.

use std::sync::Arc;

use vigil_compiler::Operation;

use crate::traced::{BoxFuture, Connection};

/// Who is asking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Opaque credential forwarded to hooks; its presence makes the request
    /// authenticated.
    pub access_token: Option<String>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }
}

/// What a mutation did, as seen by `pre_commit` and `post_commit` hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct HookInfo {
    pub mutation: String,
    pub entity: String,
    pub operation: Operation,
    pub entity_id: Option<String>,
    /// The JSON response, if the mutation re-fetched the entity
    pub return_data: Option<String>,
}

/// A request hook. Every method defaults to doing nothing.
pub trait Hook: Send + Sync {
    /// Name used in logs and in [`Error::Hook`](crate::Error::Hook).
    fn name(&self) -> &str;

    fn pre_query<'a>(
        &'a self,
        conn: &'a dyn Connection,
        context: &'a RequestContext,
        requires_auth: bool,
    ) -> BoxFuture<'a, crate::Result<()>> {
        let _ = (conn, context, requires_auth);
        Box::pin(async { Ok(()) })
    }

    fn pre_commit<'a>(
        &'a self,
        conn: &'a dyn Connection,
        info: &'a HookInfo,
    ) -> BoxFuture<'a, crate::Result<()>> {
        let _ = (conn, info);
        Box::pin(async { Ok(()) })
    }

    fn post_commit<'a>(
        &'a self,
        info: &'a HookInfo,
        context: &'a RequestContext,
    ) -> BoxFuture<'a, crate::Result<()>> {
        let _ = (info, context);
        Box::pin(async { Ok(()) })
    }
}

/// Hooks in registration order. Built once, then shared.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: impl Hook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub(crate) async fn pre_query(
        &self,
        conn: &dyn Connection,
        context: &RequestContext,
        requires_auth: bool,
    ) -> crate::Result<()> {
        for hook in &self.hooks {
            tracing::trace!(hook = hook.name(), "pre_query");
            hook.pre_query(conn, context, requires_auth).await?;
        }
        Ok(())
    }

    pub(crate) async fn pre_commit(&self, conn: &dyn Connection, info: &HookInfo) -> crate::Result<()> {
        for hook in &self.hooks {
            tracing::trace!(hook = hook.name(), "pre_commit");
            hook.pre_commit(conn, info).await?;
        }
        Ok(())
    }

    pub(crate) async fn post_commit(
        &self,
        info: &HookInfo,
        context: &RequestContext,
    ) -> crate::Result<()> {
        for hook in &self.hooks {
            tracing::trace!(hook = hook.name(), "post_commit");
            hook.post_commit(info, context).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|h| h.name()))
            .finish()
    }
}
