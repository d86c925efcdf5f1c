//! Schedulable-node selector.
//!
//! Maintains the invariant that at most one node is marked schedulable, and
//! prefers a node with positive CPU headroom (diff `target − actual` > 0).
//! The exported `schedulable` gauge is what the cluster's telemetry-aware
//! scheduler consults during placement.

use std::sync::Arc;

use async_trait::async_trait;
use joule_metrics::SchedulableTable;
use joule_prom::{MetricsSource, NodeCpuSeries};
use tracing::{debug, info};

use crate::error::Result;
use crate::runtime::{Reconciler, StrategyRuntime};

struct SchedulableCore {
    metrics: Arc<dyn MetricsSource>,
    schedulable: Arc<SchedulableTable>,
}

impl SchedulableCore {
    /// Marks the first node with positive headroom, if any.
    fn promote_first_positive(&self, diffs: &[NodeCpuSeries], exclude: Option<&str>) {
        for series in diffs {
            if exclude == Some(series.node_name.as_str()) {
                continue;
            }
            let Some(cell) = self.schedulable.get(&series.node_name) else {
                continue;
            };
            if series.last_usage().is_some_and(|diff| diff > 0.0) {
                info!(node = %series.node_name, "marking node schedulable");
                cell.set(true);
                break;
            }
        }
    }
}

#[async_trait]
impl Reconciler for SchedulableCore {
    async fn reconcile(&self) -> Result<()> {
        let diffs = self.metrics.current_cpu_diff().await?;

        let Some(current) = self.schedulable.find_schedulable() else {
            debug!("no schedulable node, picking one with headroom");
            self.promote_first_positive(&diffs, None);
            return Ok(());
        };
        let current = current.to_string();

        let current_diff = diffs
            .iter()
            .find(|s| s.node_name == current)
            .and_then(NodeCpuSeries::last_usage);
        // Missing telemetry for the current choice leaves it in place.
        if current_diff.is_some_and(|diff| diff <= 0.0) {
            info!(node = %current, "schedulable node exhausted its target, rotating");
            if let Some(cell) = self.schedulable.get(&current) {
                cell.set(false);
            }
            self.promote_first_positive(&diffs, Some(&current));
        }
        Ok(())
    }
}

/// The schedulable-selector strategy.
pub struct SchedulableStrategy {
    core: Arc<SchedulableCore>,
    runtime: StrategyRuntime,
}

impl SchedulableStrategy {
    /// Creates the selector over the shared schedulable table.
    #[must_use]
    pub fn new(metrics: Arc<dyn MetricsSource>, schedulable: Arc<SchedulableTable>) -> Self {
        let core = Arc::new(SchedulableCore {
            metrics,
            schedulable,
        });
        Self {
            runtime: StrategyRuntime::new("schedulable", core.clone()),
            core,
        }
    }

    /// Starts the selector.
    pub async fn start(&self) {
        self.runtime.start().await;
    }

    /// Stops the selector and fails open: every node becomes schedulable so
    /// a disabled controller cannot paralyze the cluster.
    pub async fn stop(&self) {
        self.runtime.stop().await;
        self.core.schedulable.set_all(true);
        info!("schedulable selector stopped, all nodes marked schedulable");
    }

    /// Whether the selector is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runtime.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use joule_prom::{InMemoryMetrics, InstantUsage};
    use std::collections::HashMap;

    fn series(node: &str, diff: f64) -> NodeCpuSeries {
        NodeCpuSeries {
            node_name: node.to_string(),
            data: vec![InstantUsage {
                timestamp: Utc::now(),
                usage: diff,
            }],
        }
    }

    fn make_table(nodes: &[&str]) -> Arc<SchedulableTable> {
        let targets: HashMap<String, f64> =
            nodes.iter().map(|n| ((*n).to_string(), 80.0)).collect();
        joule_metrics::MetricsHub::new("cpu_target", &targets).schedulable()
    }

    fn make_core(
        nodes: &[&str],
    ) -> (Arc<SchedulableCore>, Arc<InMemoryMetrics>, Arc<SchedulableTable>) {
        let metrics = Arc::new(InMemoryMetrics::new());
        let table = make_table(nodes);
        let core = Arc::new(SchedulableCore {
            metrics: metrics.clone(),
            schedulable: table.clone(),
        });
        (core, metrics, table)
    }

    #[tokio::test]
    async fn picks_a_node_with_headroom_when_none_marked() {
        let (core, metrics, table) = make_core(&["node-a", "node-b"]);
        metrics.set_diffs(vec![series("node-a", 5.0), series("node-b", 3.0)]);

        core.reconcile().await.unwrap();

        assert_eq!(table.schedulable_count(), 1);
        assert!(table.find_schedulable().is_some());
    }

    #[tokio::test]
    async fn keeps_current_choice_while_positive() {
        let (core, metrics, table) = make_core(&["node-a", "node-b"]);
        table.get("node-a").unwrap().set(true);
        metrics.set_diffs(vec![series("node-a", 5.0), series("node-b", 3.0)]);

        core.reconcile().await.unwrap();

        assert_eq!(table.find_schedulable(), Some("node-a"));
        assert_eq!(table.schedulable_count(), 1);
    }

    #[tokio::test]
    async fn rotates_away_from_exhausted_node() {
        let (core, metrics, table) = make_core(&["node-a", "node-b"]);
        table.get("node-a").unwrap().set(true);
        metrics.set_diffs(vec![series("node-a", -2.0), series("node-b", 4.0)]);

        core.reconcile().await.unwrap();

        assert_eq!(table.find_schedulable(), Some("node-b"));
        assert_eq!(table.schedulable_count(), 1);
    }

    #[tokio::test]
    async fn unmarks_without_replacement_when_no_headroom_anywhere() {
        let (core, metrics, table) = make_core(&["node-a", "node-b"]);
        table.get("node-a").unwrap().set(true);
        metrics.set_diffs(vec![series("node-a", -2.0), series("node-b", -1.0)]);

        core.reconcile().await.unwrap();

        assert_eq!(table.schedulable_count(), 0);
    }

    #[tokio::test]
    async fn diff_exactly_zero_rotates_but_is_not_headroom() {
        let (core, metrics, table) = make_core(&["node-a", "node-b"]);
        table.get("node-a").unwrap().set(true);
        metrics.set_diffs(vec![series("node-a", 0.0), series("node-b", 0.0)]);

        core.reconcile().await.unwrap();

        // diff <= 0 unmarks the current node, and no node qualifies.
        assert_eq!(table.schedulable_count(), 0);
    }

    #[tokio::test]
    async fn empty_diffs_change_nothing() {
        let (core, metrics, table) = make_core(&["node-a"]);
        table.get("node-a").unwrap().set(true);
        metrics.set_diffs(vec![]);

        core.reconcile().await.unwrap();

        assert_eq!(table.find_schedulable(), Some("node-a"));
    }

    #[tokio::test]
    async fn at_most_one_schedulable_across_many_ticks() {
        let (core, metrics, table) = make_core(&["node-a", "node-b", "node-c"]);
        let flips = [
            vec![series("node-a", 5.0), series("node-b", 3.0), series("node-c", 1.0)],
            vec![series("node-a", -2.0), series("node-b", 4.0), series("node-c", 1.0)],
            vec![series("node-a", -2.0), series("node-b", -4.0), series("node-c", 1.0)],
            vec![series("node-a", 3.0), series("node-b", -4.0), series("node-c", -1.0)],
        ];

        for diffs in flips {
            metrics.set_diffs(diffs);
            core.reconcile().await.unwrap();
            assert!(table.schedulable_count() <= 1);
        }
    }

    #[tokio::test]
    async fn stop_fails_open() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let table = make_table(&["node-a", "node-b"]);
        let strategy = SchedulableStrategy::new(metrics, table.clone());

        strategy.stop().await;

        assert_eq!(table.schedulable_count(), 2);
    }
}
