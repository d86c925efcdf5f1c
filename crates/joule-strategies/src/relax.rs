//! Target relaxer.
//!
//! When a node's measured average usage stays strictly below its target,
//! the target steps down to the next lower configured setpoint. This
//! counteracts the self-driving adjuster's downward push when demand simply
//! is not there, shrinking headroom so schedulable selection keeps finding
//! candidates. Targets only ever move down; the lowest setpoint is sticky.

use std::sync::Arc;

use async_trait::async_trait;
use joule_metrics::TargetTable;
use joule_prom::MetricsSource;
use tracing::info;

use crate::error::Result;
use crate::runtime::{Reconciler, StrategyRuntime};

/// Averaging window for the usage signal, minutes.
const USAGE_WINDOW_MINUTES: u32 = 5;

/// First setpoint strictly below the current target; the current target
/// when none is lower. Setpoints are ordered descending.
fn lower_setpoint(setpoints: &[f64], current: f64) -> f64 {
    setpoints
        .iter()
        .copied()
        .find(|s| *s < current)
        .unwrap_or(current)
}

struct RelaxCore {
    metrics: Arc<dyn MetricsSource>,
    targets: Arc<TargetTable>,
    setpoints: Vec<f64>,
}

#[async_trait]
impl Reconciler for RelaxCore {
    async fn reconcile(&self) -> Result<()> {
        let averages = self.metrics.avg_cpu_usage(USAGE_WINDOW_MINUTES).await?;
        for (node, cell) in self.targets.iter() {
            let Some(avg) = averages
                .iter()
                .find(|a| a.node_name == node)
                .map(|a| a.avg)
            else {
                continue;
            };
            let current = cell.get();
            if avg < current {
                let next = lower_setpoint(&self.setpoints, current);
                if next < current {
                    info!(node = %node, from = current, to = next, "relaxing target");
                    cell.set(next);
                }
            }
        }
        Ok(())
    }
}

/// The target-relaxation strategy. Always-on housekeeping in practice; the
/// orchestrator starts it at boot.
pub struct TargetRelaxStrategy {
    runtime: StrategyRuntime,
}

impl TargetRelaxStrategy {
    /// Creates the relaxer with the configured descending setpoints.
    #[must_use]
    pub fn new(
        metrics: Arc<dyn MetricsSource>,
        targets: Arc<TargetTable>,
        setpoints: Vec<f64>,
    ) -> Self {
        let core = Arc::new(RelaxCore {
            metrics,
            targets,
            setpoints,
        });
        Self {
            runtime: StrategyRuntime::new("target-relax", core),
        }
    }

    /// Starts the relaxer.
    pub async fn start(&self) {
        self.runtime.start().await;
    }

    /// Stops the relaxer.
    pub async fn stop(&self) {
        self.runtime.stop().await;
    }

    /// Whether the relaxer is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runtime.is_running()
    }
}
