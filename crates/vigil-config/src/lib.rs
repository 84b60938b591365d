//! Configuration schema for vigil.
//!
//! These types mirror `.config/vigil.styx`. Every setting is optional in the
//! file; the `resolved` accessors fill in defaults so the rest of the code
//! never deals with `Option`s.

use facet::Facet;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Facet)]
pub struct Config {
    /// Where generated views live and who may use them.
    pub views: Option<ViewSettings>,

    /// Database connection pool.
    pub pool: Option<PoolSettings>,

    /// Soft cost limit for nested reads.
    pub cost: Option<CostSettings>,
}

/// `views { ... }` section.
#[derive(Debug, Clone, Default, Facet)]
pub struct ViewSettings {
    /// Schema that receives the generated views (default `api`).
    pub schema: Option<String>,
    /// Role that is granted access to the generated views (default `vigil_user`).
    pub role: Option<String>,
    /// SQL yielding the authenticated caller's id (default `_meta.current_user_id()`).
    pub current_user_id: Option<String>,
    /// SQL yielding the id generated by the last insert in this transaction
    /// (default `_meta.get_last_generated_uuid()`).
    pub last_generated_id: Option<String>,
}

/// `pool { ... }` section.
#[derive(Debug, Clone, Default, Facet)]
pub struct PoolSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub dbname: Option<String>,
    pub application_name: Option<String>,
    /// Connections kept open per node (default 1).
    pub min: Option<usize>,
    /// Connection ceiling shared by every node of the cluster (default 20).
    pub total_max: Option<usize>,
    /// Idle connections are closed after this long (default 10000).
    pub idle_timeout_ms: Option<u64>,
    /// Bounded wait for a free connection (default 5000).
    pub connection_timeout_ms: Option<u64>,
}

/// `cost { ... }` section.
#[derive(Debug, Clone, Default, Facet)]
pub struct CostSettings {
    /// Planner cost above which a query is logged (default 2000).
    pub ceiling: Option<f64>,
    /// Structural estimate at which the planner is consulted (default 3).
    pub depth_threshold: Option<usize>,
}

/// View settings with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewConfig {
    pub schema: String,
    pub role: String,
    pub current_user_id: String,
    pub last_generated_id: String,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            schema: "api".to_string(),
            role: "vigil_user".to_string(),
            current_user_id: "_meta.current_user_id()".to_string(),
            last_generated_id: "_meta.get_last_generated_uuid()".to_string(),
        }
    }
}

/// Pool settings with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub dbname: Option<String>,
    pub application_name: String,
    pub min: usize,
    pub total_max: usize,
    pub idle_timeout_ms: u64,
    pub connection_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: None,
            password: None,
            dbname: None,
            application_name: "vigil".to_string(),
            min: 1,
            total_max: 20,
            idle_timeout_ms: 10_000,
            connection_timeout_ms: 5_000,
        }
    }
}

/// Cost settings with defaults applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostConfig {
    pub ceiling: f64,
    pub depth_threshold: usize,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            ceiling: 2000.0,
            depth_threshold: 3,
        }
    }
}

impl Config {
    pub fn view_config(&self) -> ViewConfig {
        let defaults = ViewConfig::default();
        let Some(views) = &self.views else {
            return defaults;
        };
        ViewConfig {
            schema: views.schema.clone().unwrap_or(defaults.schema),
            role: views.role.clone().unwrap_or(defaults.role),
            current_user_id: views
                .current_user_id
                .clone()
                .unwrap_or(defaults.current_user_id),
            last_generated_id: views
                .last_generated_id
                .clone()
                .unwrap_or(defaults.last_generated_id),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        let defaults = PoolConfig::default();
        let Some(pool) = &self.pool else {
            return defaults;
        };
        PoolConfig {
            host: pool.host.clone().unwrap_or(defaults.host),
            port: pool.port.unwrap_or(defaults.port),
            user: pool.user.clone(),
            password: pool.password.clone(),
            dbname: pool.dbname.clone(),
            application_name: pool
                .application_name
                .clone()
                .unwrap_or(defaults.application_name),
            min: pool.min.unwrap_or(defaults.min),
            total_max: pool.total_max.unwrap_or(defaults.total_max),
            idle_timeout_ms: pool.idle_timeout_ms.unwrap_or(defaults.idle_timeout_ms),
            connection_timeout_ms: pool
                .connection_timeout_ms
                .unwrap_or(defaults.connection_timeout_ms),
        }
    }

    pub fn cost_config(&self) -> CostConfig {
        let defaults = CostConfig::default();
        let Some(cost) = &self.cost else {
            return defaults;
        };
        CostConfig {
            ceiling: cost.ceiling.unwrap_or(defaults.ceiling),
            depth_threshold: cost.depth_threshold.unwrap_or(defaults.depth_threshold),
        }
    }
}
