//! Compiler configuration.

use indexmap::IndexSet;
use vigil_config::ViewConfig;

use crate::expression::ExpressionRegistry;

/// Everything the compiler needs besides the document and permissions.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub expressions: ExpressionRegistry,
    /// Names of resolvers that `@custom` fields may bind to
    pub resolvers: IndexSet<String>,
    pub views: ViewConfig,
    pub(crate) security_barrier: bool,
}

impl CompilerConfig {
    pub fn new(views: ViewConfig, expressions: ExpressionRegistry) -> Self {
        Self {
            expressions,
            resolvers: IndexSet::new(),
            views,
            security_barrier: true,
        }
    }

    pub fn with_resolver(mut self, name: impl Into<String>) -> Self {
        self.resolvers.insert(name.into());
        self
    }

    /// Test-only: emit views without `security_barrier`.
    #[cfg(test)]
    pub(crate) fn without_security_barrier(mut self) -> Self {
        self.security_barrier = false;
        self
    }
}
