//! Query result shapes shared with the dashboard API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One CPU sample in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstantUsage {
    /// Sample timestamp.
    pub timestamp: DateTime<Utc>,
    /// CPU usage or diff in percent.
    pub usage: f64,
}

/// A node's recent CPU samples. For instant queries the series holds a
/// single sample; for range queries one per step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCpuSeries {
    /// Node name (the `instance` label).
    pub node_name: String,
    /// Samples, oldest first.
    pub data: Vec<InstantUsage>,
}

impl NodeCpuSeries {
    /// The most recent sample's value, if any.
    #[must_use]
    pub fn last_usage(&self) -> Option<f64> {
        self.data.last().map(|s| s.usage)
    }
}

/// A node's average CPU usage over a query window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAvgUsage {
    /// Node name.
    pub node_name: String,
    /// Average usage in percent.
    pub avg: f64,
}

/// Arithmetic mean of a sample slice; zero when empty.
#[must_use]
pub fn avg_instant_usage(samples: &[InstantUsage]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let len = samples.len() as f64;
    samples.iter().map(|s| s.usage).sum::<f64>() / len
}
