//! Typed adapter over the Kubernetes cluster.
//!
//! Every remote operation the control loops need — listing pods, patching
//! CPU limits, creating and releasing stress jobs, validating node names —
//! goes through the [`ClusterOps`] trait. The shipped implementation is a
//! thin wrapper over `kube`; [`FakeCluster`] backs the tests.

#![forbid(unsafe_code)]

mod client;
mod error;
mod fake;
mod job;
mod quantity;
mod types;

pub use client::{ClusterOps, KubeCluster};
pub use error::{ClusterError, Result};
pub use fake::FakeCluster;
pub use job::{
    generate_job_name, StressJob, StressJobBuilder, WorkloadKind, HARDWARE_TARGET_LABEL,
    HOSTNAME_LABEL, MIN_CPU_ANNOTATION, START_AFTER_ANNOTATION,
};
pub use quantity::CpuQuantity;
pub use types::{JobView, PodPhase, PodView};
