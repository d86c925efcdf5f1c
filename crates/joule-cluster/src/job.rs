//! Stress-job model and rendering.
//!
//! A [`StressJob`] is the abstract job the orchestrator admits; rendering to
//! a Kubernetes `batch/v1` Job happens at creation time so the rest of the
//! system never touches raw cluster objects.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ClusterError;
use crate::quantity::CpuQuantity;

/// Annotation carrying a pod's minimum CPU floor in percent.
pub const MIN_CPU_ANNOTATION: &str = "joule.io/min-cpu";

/// Annotation carrying a deferred job's RFC3339 release time.
pub const START_AFTER_ANNOTATION: &str = "joule.io/start-after";

/// Node label selecting a hardware-affine node pool.
pub const HARDWARE_TARGET_LABEL: &str = "joule.io/hardware-target";

/// Well-known node label pinning a workload to one host.
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

const STRESS_IMAGE: &str = "petarmaric/docker.cpu-stress-test";

/// Coarse hardware affinity of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    /// CPU-bound stress.
    Cpu,
    /// Storage-bound stress.
    Storage,
    /// Memory-bound stress.
    Memory,
}

impl WorkloadKind {
    /// Label value used in node selectors.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Storage => "storage",
            Self::Memory => "memory",
        }
    }
}

/// Generates a job name from the requested CPU target, with a random suffix
/// for uniqueness within the namespace.
#[must_use]
pub fn generate_job_name(cpu_target_percent: f64) -> String {
    #[allow(clippy::cast_possible_truncation)]
    let target = cpu_target_percent.round() as i64;
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{target}-cpu-stresstest-{}", &suffix[..8])
}

/// A stress workload ready to be created in the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct StressJob {
    /// Job name, unique within the namespace.
    pub name: String,
    /// CPU limit of the single stress container.
    pub cpu_limit: CpuQuantity,
    /// Cores the stress tool should exercise.
    pub cpu_count: u32,
    /// How long the job runs; doubles as its active deadline.
    pub length: Duration,
    /// Hardware affinity, surfaced as a node-selector label.
    pub kind: Option<WorkloadKind>,
    /// Concrete host to pin the job to.
    pub host_selector: Option<String>,
    /// Earliest start time; a future value creates the job suspended.
    pub start_after: Option<DateTime<Utc>>,
    /// Minimum CPU floor in percent, always annotated on the pod template.
    pub min_cpu_percent: f64,
}

impl StressJob {
    /// Starts building a job.
    #[must_use]
    pub fn builder() -> StressJobBuilder {
        StressJobBuilder::default()
    }

    /// Whether the job must wait for a future start time.
    #[must_use]
    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.start_after.is_some_and(|t| t > now)
    }

    /// Renders the job into a `batch/v1` Job object.
    #[must_use]
    pub fn to_k8s_job(&self, namespace: &str, now: DateTime<Utc>) -> Job {
        let minutes = self.length.as_secs() / 60;

        let mut job_annotations = BTreeMap::new();
        let deferred = self.is_deferred(now);
        if let Some(start) = self.start_after {
            if deferred {
                job_annotations.insert(
                    START_AFTER_ANNOTATION.to_string(),
                    start.to_rfc3339_opts(SecondsFormat::Secs, true),
                );
            }
        }

        let mut pod_annotations = BTreeMap::new();
        pod_annotations.insert(
            MIN_CPU_ANNOTATION.to_string(),
            self.min_cpu_percent.to_string(),
        );

        let mut node_selector = BTreeMap::new();
        if let Some(host) = &self.host_selector {
            node_selector.insert(HOSTNAME_LABEL.to_string(), host.clone());
        }
        if let Some(kind) = self.kind {
            node_selector.insert(HARDWARE_TARGET_LABEL.to_string(), kind.as_label().to_string());
        }

        let container = Container {
            name: self.name.clone(),
            image: Some(STRESS_IMAGE.to_string()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            env: Some(vec![
                EnvVar {
                    name: "MAX_CPU_CORES".to_string(),
                    value: Some(self.cpu_count.to_string()),
                    ..EnvVar::default()
                },
                EnvVar {
                    name: "STRESS_SYSTEM_FOR".to_string(),
                    value: Some(format!("{minutes}m")),
                    ..EnvVar::default()
                },
            ]),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "cpu".to_string(),
                    Quantity(self.cpu_limit.quarter().to_string()),
                )])),
                limits: Some(BTreeMap::from([(
                    "cpu".to_string(),
                    Quantity(self.cpu_limit.to_string()),
                )])),
                ..ResourceRequirements::default()
            }),
            ..Container::default()
        };

        #[allow(clippy::cast_possible_wrap)] // job lengths are minutes, not eons
        let deadline = self.length.as_secs() as i64;

        Job {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(namespace.to_string()),
                annotations: (!job_annotations.is_empty()).then_some(job_annotations),
                ..ObjectMeta::default()
            },
            spec: Some(JobSpec {
                active_deadline_seconds: Some(deadline),
                backoff_limit: Some(4),
                suspend: deferred.then_some(true),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(BTreeMap::from([(
                            "app".to_string(),
                            self.name.clone(),
                        )])),
                        annotations: Some(pod_annotations),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        restart_policy: Some("Never".to_string()),
                        node_selector: (!node_selector.is_empty()).then_some(node_selector),
                        ..PodSpec::default()
                    }),
                },
                ..JobSpec::default()
            }),
            status: None,
        }
    }
}

/// Builder for [`StressJob`].
#[derive(Debug, Clone, Default)]
pub struct StressJobBuilder {
    name: Option<String>,
    cpu_limit: Option<CpuQuantity>,
    cpu_count: Option<u32>,
    length: Option<Duration>,
    kind: Option<WorkloadKind>,
    host_selector: Option<String>,
    start_after: Option<DateTime<Utc>>,
    min_cpu_percent: f64,
}

impl StressJobBuilder {
    /// Sets the job name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the container CPU limit.
    #[must_use]
    pub fn cpu_limit(mut self, limit: CpuQuantity) -> Self {
        self.cpu_limit = Some(limit);
        self
    }

    /// Sets the number of cores the stress tool exercises.
    #[must_use]
    pub fn cpu_count(mut self, count: u32) -> Self {
        self.cpu_count = Some(count);
        self
    }

    /// Sets the run length.
    #[must_use]
    pub fn length(mut self, length: Duration) -> Self {
        self.length = Some(length);
        self
    }

    /// Sets the hardware affinity.
    #[must_use]
    pub fn workload_kind(mut self, kind: WorkloadKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Pins the job to a concrete host.
    #[must_use]
    pub fn host_selector(mut self, node: impl Into<String>) -> Self {
        self.host_selector = Some(node.into());
        self
    }

    /// Defers the job until the given time.
    #[must_use]
    pub fn start_after(mut self, start: DateTime<Utc>) -> Self {
        self.start_after = Some(start);
        self
    }

    /// Sets the minimum CPU floor in percent.
    #[must_use]
    pub fn min_cpu(mut self, percent: f64) -> Self {
        self.min_cpu_percent = percent;
        self
    }

    /// Builds the job.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::MissingJobField`] when name, limit, core
    /// count, or length is unset.
    pub fn build(self) -> Result<StressJob, ClusterError> {
        let name = self
            .name
            .ok_or(ClusterError::MissingJobField { field: "name" })?;
        let cpu_limit = self
            .cpu_limit
            .ok_or(ClusterError::MissingJobField { field: "cpu_limit" })?;
        let cpu_count = self
            .cpu_count
            .filter(|c| *c > 0)
            .ok_or(ClusterError::MissingJobField { field: "cpu_count" })?;
        let length = self
            .length
            .filter(|l| !l.is_zero())
            .ok_or(ClusterError::MissingJobField { field: "length" })?;

        Ok(StressJob {
            name,
            cpu_limit,
            cpu_count,
            length,
            kind: self.kind,
            host_selector: self.host_selector,
            start_after: self.start_after,
            min_cpu_percent: self.min_cpu_percent,
        })
    }
}
