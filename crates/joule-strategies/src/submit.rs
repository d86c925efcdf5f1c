//! Admission callback seam.
//!
//! The automatic-spawn strategy needs to submit workloads through the
//! orchestrator, and the orchestrator owns the strategies. The cycle is
//! broken here: strategies only see the [`WorkloadSubmitter`] trait, held
//! weakly, never the orchestrator itself.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use joule_cluster::WorkloadKind;
use serde::Deserialize;
use thiserror::Error;

/// Option-style admission request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRequest {
    /// Explicit job name; generated from the target when unset.
    #[serde(default, rename = "podName")]
    pub name: Option<String>,
    /// CPU target in percent of one node.
    pub cpu_target: f64,
    /// Run length in minutes.
    pub job_length: u64,
    /// Cores the stress tool exercises.
    pub cpu_count: u32,
    /// Hardware affinity.
    #[serde(default, rename = "workloadType")]
    pub kind: Option<WorkloadKind>,
    /// Energy-scenario override; live consumption is queried when unset.
    #[serde(default)]
    pub scenario: Option<HashMap<String, f64>>,
    /// Earliest start time; a future value defers the job.
    #[serde(default)]
    pub start_after: Option<DateTime<Utc>>,
    /// Minimum CPU floor in percent.
    #[serde(default)]
    pub min_cpu: Option<f64>,
}

/// Error returned by the admission callback.
#[derive(Error, Debug)]
#[error("workload submission failed: {0}")]
pub struct SubmitError(pub String);

/// Abstract admission pipeline, implemented by the orchestrator.
#[async_trait]
pub trait WorkloadSubmitter: Send + Sync {
    /// Admits one workload and returns the created job's name.
    async fn submit(&self, request: WorkloadRequest) -> Result<String, SubmitError>;
}
