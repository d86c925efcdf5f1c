//! Time-and-watt-aware (TAWA) placement gate.
//!
//! TAWA is a gating flag rather than a full reconciler: while it runs, the
//! orchestrator's admission pipeline consults the power predictor for every
//! new workload. The reconcile body is a placeholder for a future
//! job-queue-aware variant.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::runtime::{Reconciler, StrategyRuntime};

struct TawaCore;

#[async_trait]
impl Reconciler for TawaCore {
    async fn reconcile(&self) -> Result<()> {
        // Placement happens at admission time; nothing to reconcile yet.
        Ok(())
    }
}

/// The TAWA gate.
pub struct TawaStrategy {
    runtime: StrategyRuntime,
}

impl TawaStrategy {
    /// Creates the gate, disabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            runtime: StrategyRuntime::new("tawa", Arc::new(TawaCore)),
        }
    }

    /// Enables energy-aware placement.
    pub async fn start(&self) {
        self.runtime.start().await;
    }

    /// Disables energy-aware placement.
    pub async fn stop(&self) {
        self.runtime.stop().await;
    }

    /// Whether admissions should consult the predictor.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.runtime.is_running()
    }
}

impl Default for TawaStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn gate_toggles() {
        let tawa = TawaStrategy::new();
        assert!(!tawa.is_enabled());

        tawa.start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tawa.is_enabled());

        tawa.stop().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!tawa.is_enabled());
    }
}
