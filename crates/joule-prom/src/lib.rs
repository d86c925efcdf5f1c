//! Typed queries against the cluster time-series store.
//!
//! The control loops never write PromQL themselves; they go through
//! [`MetricsSource`], which exposes exactly the signals the strategies
//! consume: per-node CPU diffs, windowed averages, core counts, and current
//! energy consumption per power label.

#![forbid(unsafe_code)]

mod error;
mod http;
mod source;
mod types;

pub use error::{MetricsError, Result};
pub use http::PromClient;
pub use source::{InMemoryMetrics, MetricsSource};
pub use types::{avg_instant_usage, InstantUsage, NodeAvgUsage, NodeCpuSeries};
