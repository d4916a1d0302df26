//! Port abstraction for dependency connectivity probes.

use async_trait::async_trait;

/// Port for cheap "is this dependency reachable" checks.
///
/// Probes run under a bounded timeout in the readiness handler; they must
/// not take locks or mutate state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DependencyPing: Send + Sync {
    /// Dependency descriptor (`postgres`, `redis`, `memory`).
    fn name(&self) -> &'static str;

    /// Probe the dependency.
    async fn ping(&self) -> Result<(), String>;
}

/// Probe for in-process dependencies that cannot fail.
#[derive(Debug, Clone, Copy)]
pub struct AlwaysHealthy {
    name: &'static str,
}

impl AlwaysHealthy {
    /// Create a probe reporting the given dependency name.
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl DependencyPing for AlwaysHealthy {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn ping(&self) -> Result<(), String> {
        Ok(())
    }
}
