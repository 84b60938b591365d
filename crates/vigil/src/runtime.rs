use std::sync::Arc;

use vigil_config::{Config, CostConfig, ViewConfig};

use crate::cost::{CostEstimator, ExplainCostEstimator};
use crate::hooks::HookRegistry;
use crate::query::OperatorRegistry;

/// Everything the executor needs besides the compiled schema and a
/// connection source.
#[derive(Clone)]
pub struct RuntimeConfig {
    pub operators: OperatorRegistry,
    pub hooks: HookRegistry,
    pub cost_estimator: Arc<dyn CostEstimator>,
    pub cost: CostConfig,
    pub views: ViewConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            operators: OperatorRegistry::default(),
            hooks: HookRegistry::new(),
            cost_estimator: Arc::new(ExplainCostEstimator),
            cost: CostConfig::default(),
            views: ViewConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cost: config.cost_config(),
            views: config.view_config(),
            ..Self::default()
        }
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_operators(mut self, operators: OperatorRegistry) -> Self {
        self.operators = operators;
        self
    }

    pub fn with_cost_estimator(mut self, estimator: impl CostEstimator + 'static) -> Self {
        self.cost_estimator = Arc::new(estimator);
        self
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("operators", &self.operators.names().collect::<Vec<_>>())
            .field("hooks", &self.hooks)
            .field("cost", &self.cost)
            .field("views", &self.views)
            .finish_non_exhaustive()
    }
}
