//! The [`MetricsSource`] trait and its in-memory double.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{MetricsError, Result};
use crate::types::{NodeAvgUsage, NodeCpuSeries};

/// Read-only view of the cluster's CPU and energy telemetry.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Signed per-node diff `target − actual` in percent, newest samples.
    async fn current_cpu_diff(&self) -> Result<Vec<NodeCpuSeries>>;

    /// A single node's current diff.
    async fn node_cpu_diff(&self, node: &str) -> Result<f64>;

    /// Per-node average CPU usage over the trailing window.
    async fn avg_cpu_usage(&self, window_minutes: u32) -> Result<Vec<NodeAvgUsage>>;

    /// Per-node CPU core counts.
    async fn cpu_counts(&self) -> Result<HashMap<String, u32>>;

    /// Current energy consumption in watts, keyed by power label.
    async fn current_energy_consumption(&self) -> Result<HashMap<String, f64>>;

    /// Per-node CPU usage between two instants, one sample per second.
    async fn cpu_usage_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<NodeCpuSeries>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    diffs: Vec<NodeCpuSeries>,
    avg_usage: HashMap<String, f64>,
    cpu_counts: HashMap<String, u32>,
    energy: HashMap<String, f64>,
    range: Vec<NodeCpuSeries>,
}

/// In-memory [`MetricsSource`] for tests.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    state: Mutex<MemoryState>,
}

impl InMemoryMetrics {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current diff series.
    pub fn set_diffs(&self, diffs: Vec<NodeCpuSeries>) {
        self.state.lock().diffs = diffs;
    }

    /// Sets a node's windowed average usage.
    pub fn set_avg_usage(&self, node: &str, avg: f64) {
        self.state.lock().avg_usage.insert(node.to_string(), avg);
    }

    /// Sets a node's core count.
    pub fn set_cpu_count(&self, node: &str, cores: u32) {
        self.state.lock().cpu_counts.insert(node.to_string(), cores);
    }

    /// Sets a power label's consumption.
    pub fn set_energy(&self, label: &str, watts: f64) {
        self.state.lock().energy.insert(label.to_string(), watts);
    }

    /// Replaces the range-query payload.
    pub fn set_range(&self, range: Vec<NodeCpuSeries>) {
        self.state.lock().range = range;
    }
}

#[async_trait]
impl MetricsSource for InMemoryMetrics {
    async fn current_cpu_diff(&self) -> Result<Vec<NodeCpuSeries>> {
        Ok(self.state.lock().diffs.clone())
    }

    async fn node_cpu_diff(&self, node: &str) -> Result<f64> {
        self.state
            .lock()
            .diffs
            .iter()
            .find(|s| s.node_name == node)
            .and_then(NodeCpuSeries::last_usage)
            .ok_or_else(|| MetricsError::NoData {
                query: format!("node_cpu_diff{{instance=\"{node}\"}}"),
            })
    }

    async fn avg_cpu_usage(&self, _window_minutes: u32) -> Result<Vec<NodeAvgUsage>> {
        Ok(self
            .state
            .lock()
            .avg_usage
            .iter()
            .map(|(node, avg)| NodeAvgUsage {
                node_name: node.clone(),
                avg: *avg,
            })
            .collect())
    }

    async fn cpu_counts(&self) -> Result<HashMap<String, u32>> {
        Ok(self.state.lock().cpu_counts.clone())
    }

    async fn current_energy_consumption(&self) -> Result<HashMap<String, f64>> {
        Ok(self.state.lock().energy.clone())
    }

    async fn cpu_usage_range(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<NodeCpuSeries>> {
        Ok(self.state.lock().range.clone())
    }
}
