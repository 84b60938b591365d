//! Connection pooling.
//!
//! The database has one connection ceiling for the whole cluster, so each
//! node only gets a fair share of it. When the number of nodes changes, the
//! pool is rebuilt with the new share and the old one is closed; connections
//! already checked out finish their transaction first and are dropped when
//! they come back.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use deadpool_postgres::{Config as DeadpoolConfig, Pool, PoolError, Runtime, Timeouts};
use tokio::task::JoinHandle;
use tokio_postgres::NoTls;
use tracing::{debug, info};
use vigil_config::PoolConfig;

use crate::traced::{BoxFuture, Connection};

/// Hands out connections for one request at a time.
///
/// The connection goes back to the pool when the returned box is dropped.
pub trait ConnectionProvider: Send + Sync {
    fn acquire(&self) -> BoxFuture<'_, crate::Result<Box<dyn Connection>>>;
}

/// Connections one node may hold: `floor(total_max / nodes) - 1`, at least one.
pub fn connections_per_node(total_max: usize, nodes: usize) -> usize {
    (total_max / nodes.max(1)).saturating_sub(1).max(1)
}

struct PoolState {
    pool: Pool,
    nodes: usize,
    max_size: usize,
}

/// A deadpool pool that resizes with the cluster.
pub struct ManagedPool {
    config: PoolConfig,
    state: RwLock<PoolState>,
}

impl ManagedPool {
    /// Build the pool for a single node. Connections are opened lazily.
    pub fn new(config: PoolConfig) -> crate::Result<Self> {
        let max_size = connections_per_node(config.total_max, 1);
        let pool = build_pool(&config, max_size)?;
        Ok(Self {
            config,
            state: RwLock::new(PoolState {
                pool,
                nodes: 1,
                max_size,
            }),
        })
    }

    /// Current per-node connection limit.
    pub fn max_size(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .max_size
    }

    /// Record the number of nodes sharing the database.
    ///
    /// The pool is rebuilt only when the per-node share changes. A new node
    /// count that divides to the same share keeps the current pool and its
    /// idle connections. Returns whether the pool was rebuilt.
    pub fn set_node_count(&self, nodes: usize) -> crate::Result<bool> {
        let nodes = nodes.max(1);
        let max_size = connections_per_node(self.config.total_max, nodes);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.nodes = nodes;
        if state.max_size == max_size {
            debug!(nodes, max_size, "node count changed, pool size unchanged");
            return Ok(false);
        }

        let pool = build_pool(&self.config, max_size)?;
        let old = std::mem::replace(&mut state.pool, pool);
        state.max_size = max_size;
        // Checked-out connections stay usable; they are dropped on return.
        old.close();
        info!(nodes, max_size, "connection pool rebuilt");
        Ok(true)
    }

    pub fn node_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .nodes
    }

    /// Close connections that sat idle longer than `idle_timeout_ms`.
    ///
    /// Returns how many were closed.
    pub fn prune_idle(&self) -> usize {
        let idle = Duration::from_millis(self.config.idle_timeout_ms);
        let removed = self.pool().retain(|_, metrics| metrics.last_used() < idle).removed;
        if !removed.is_empty() {
            debug!(closed = removed.len(), "idle connections closed");
        }
        removed.len()
    }

    /// Run [`ManagedPool::prune_idle`] every `idle_timeout_ms` until the
    /// returned task is aborted.
    pub fn spawn_idle_reaper(self: Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_millis(self.config.idle_timeout_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.prune_idle();
            }
        })
    }

    /// The pool currently handing out connections.
    pub fn pool(&self) -> Pool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .pool
            .clone()
    }
}

impl ConnectionProvider for ManagedPool {
    fn acquire(&self) -> BoxFuture<'_, crate::Result<Box<dyn Connection>>> {
        let pool = self.pool();
        Box::pin(async move {
            let conn = pool.get().await.map_err(|e| match e {
                PoolError::Timeout(_) => crate::Error::PoolTimeout,
                PoolError::Backend(e) => crate::Error::Postgres(e),
                other => crate::Error::Pool(other.to_string()),
            })?;
            Ok(Box::new(conn) as Box<dyn Connection>)
        })
    }
}

fn build_pool(config: &PoolConfig, max_size: usize) -> crate::Result<Pool> {
    let mut cfg = DeadpoolConfig::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = config.user.clone();
    cfg.password = config.password.clone();
    cfg.dbname = config.dbname.clone();
    cfg.application_name = Some(config.application_name.clone());

    let mut pool_config = deadpool_postgres::PoolConfig::new(max_size);
    pool_config.timeouts = Timeouts {
        wait: Some(Duration::from_millis(config.connection_timeout_ms)),
        create: Some(Duration::from_millis(config.connection_timeout_ms)),
        recycle: None,
    };
    cfg.pool = Some(pool_config);

    let pool = cfg
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| crate::Error::Pool(e.to_string()))?;
    debug!(
        min = config.min,
        max = max_size,
        application_name = %config.application_name,
        "pool created"
    );
    Ok(pool)
}
