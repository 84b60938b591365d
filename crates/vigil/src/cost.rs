//! Query cost control.
//!
//! Nested reads can fan out badly. Each built query carries a cheap
//! structural estimate; when it reaches the configured threshold the planner
//! is asked for a real cost, and anything above the ceiling is logged. The
//! query runs either way.

use vigil_config::CostConfig;

use crate::query::Value;
use crate::traced::{BoxFuture, Connection};

/// Shape of a nested read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaticCost {
    /// Deepest relation nesting (0 for a flat query)
    pub depth: usize,
    /// Number of relation sub-selections
    pub fan_out: usize,
}

impl StaticCost {
    pub fn score(&self) -> usize {
        self.depth * self.fan_out
    }

    /// Whether the planner should be consulted.
    pub fn needs_check(&self, config: &CostConfig) -> bool {
        self.fan_out > 0 && self.score() >= config.depth_threshold
    }
}

/// Asks the database what a statement would cost.
pub trait CostEstimator: Send + Sync {
    fn estimate<'a>(
        &'a self,
        conn: &'a dyn Connection,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, crate::Result<Option<f64>>>;
}

/// Runs `EXPLAIN` and reads the total cost of the top plan node.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplainCostEstimator;

impl CostEstimator for ExplainCostEstimator {
    fn estimate<'a>(
        &'a self,
        conn: &'a dyn Connection,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, crate::Result<Option<f64>>> {
        Box::pin(async move {
            let explain = format!("EXPLAIN {sql}");
            let rows = conn.query(&explain, params).await?;
            let top = rows
                .first()
                .and_then(|row| row.first())
                .and_then(|(_, plan)| plan.as_str());
            Ok(top.and_then(parse_explain_cost))
        })
    }
}

/// Total cost out of an `EXPLAIN` line such as
/// `Seq Scan on "Task"  (cost=0.00..35.50 rows=2550 width=4)`.
pub fn parse_explain_cost(line: &str) -> Option<f64> {
    let start = line.find("cost=")? + "cost=".len();
    let rest = &line[start..];
    let (_, total) = rest.split_once("..")?;
    let end = total
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(total.len());
    total[..end].parse().ok()
}
