//! The [`ClusterOps`] trait and its `kube`-backed implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

use crate::error::{ClusterError, Result};
use crate::job::{StressJob, START_AFTER_ANNOTATION};
use crate::quantity::CpuQuantity;
use crate::types::{JobView, PodPhase, PodView};
use crate::MIN_CPU_ANNOTATION;

/// Read/patch operations the control loops need from the cluster.
///
/// Implementations must be safe for concurrent use; the strategies share one
/// instance behind an `Arc`.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Lists all pods in the managed namespace.
    async fn list_pods(&self) -> Result<Vec<PodView>>;

    /// Returns the node a pod runs on, or `None` while it is not `Running`.
    async fn pod_node_name(&self, pod: &str) -> Result<Option<String>>;

    /// Patches the CPU limit of a pod's stress container.
    async fn patch_cpu_limit(&self, pod: &str, limit: CpuQuantity) -> Result<()>;

    /// Creates a stress job.
    async fn create_job(&self, job: &StressJob) -> Result<()>;

    /// Deletes succeeded jobs and pods. Returns whether anything was
    /// deleted.
    async fn clear_completed_workloads(&self) -> Result<bool>;

    /// Deletes the oldest unfinished job that still owns a pending pod.
    /// Returns whether a job was deleted.
    async fn delete_last_pending_workload(&self) -> Result<bool>;

    /// Lists jobs currently created in the suspended state.
    async fn list_suspended_jobs(&self) -> Result<Vec<JobView>>;

    /// Releases a suspended job.
    async fn unsuspend_job(&self, name: &str) -> Result<()>;

    /// Whether a node with this name exists in the cluster.
    async fn is_node_name_valid(&self, name: &str) -> Result<bool>;
}

/// `kube`-backed cluster adapter, scoped to one namespace.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    /// Creates an adapter over an established client.
    #[must_use]
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn jobs(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn parse_annotation_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn pod_view(pod: &Pod) -> PodView {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let annotations = pod.metadata.annotations.as_ref();

    let cpu_limit = pod
        .spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.resources.as_ref())
        .and_then(|r| r.limits.as_ref())
        .and_then(|l| l.get("cpu"))
        .and_then(|q| q.0.parse::<CpuQuantity>().ok());

    let min_cpu_percent = annotations
        .and_then(|a| a.get(MIN_CPU_ANNOTATION))
        .and_then(|raw| raw.parse::<f64>().ok());

    PodView {
        name,
        node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        phase: pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map_or(PodPhase::Unknown, PodPhase::from),
        created_at: pod.metadata.creation_timestamp.as_ref().map(|t| t.0),
        started_at: pod
            .status
            .as_ref()
            .and_then(|s| s.start_time.as_ref())
            .map(|t| t.0),
        cpu_limit,
        min_cpu_percent,
    }
}

fn job_view(job: &Job) -> JobView {
    JobView {
        name: job.metadata.name.clone().unwrap_or_default(),
        suspended: job
            .spec
            .as_ref()
            .and_then(|s| s.suspend)
            .unwrap_or(false),
        start_after: job
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(START_AFTER_ANNOTATION))
            .and_then(|raw| parse_annotation_time(raw)),
        succeeded: job.status.as_ref().and_then(|s| s.succeeded).unwrap_or(0),
        active: job.status.as_ref().and_then(|s| s.active).unwrap_or(0),
        created_at: job.metadata.creation_timestamp.as_ref().map(|t| t.0),
    }
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn list_pods(&self) -> Result<Vec<PodView>> {
        let pods = self.pods().list(&ListParams::default()).await?;
        Ok(pods.items.iter().map(pod_view).collect())
    }

    async fn pod_node_name(&self, pod: &str) -> Result<Option<String>> {
        let found = self
            .pods()
            .get_opt(pod)
            .await?
            .ok_or_else(|| ClusterError::PodNotFound {
                name: pod.to_string(),
            })?;
        let view = pod_view(&found);
        if view.phase == PodPhase::Running {
            Ok(view.node_name)
        } else {
            Ok(None)
        }
    }

    async fn patch_cpu_limit(&self, pod: &str, limit: CpuQuantity) -> Result<()> {
        let api = self.pods();
        let found = api
            .get_opt(pod)
            .await?
            .ok_or_else(|| ClusterError::PodNotFound {
                name: pod.to_string(),
            })?;
        let container = found
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .ok_or_else(|| ClusterError::NoContainers {
                name: pod.to_string(),
            })?;

        let patch = serde_json::json!({
            "spec": {
                "containers": [{
                    "name": container.name,
                    "resources": { "limits": { "cpu": limit.to_string() } },
                }],
            },
        });
        debug!(pod = %pod, limit = %limit, "patching cpu limit");
        api.patch(pod, &PatchParams::default(), &Patch::Strategic(&patch))
            .await?;
        Ok(())
    }

    async fn create_job(&self, job: &StressJob) -> Result<()> {
        let rendered = job.to_k8s_job(&self.namespace, Utc::now());
        info!(job = %job.name, limit = %job.cpu_limit, "creating stress job");
        self.jobs().create(&PostParams::default(), &rendered).await?;
        Ok(())
    }

    async fn clear_completed_workloads(&self) -> Result<bool> {
        let mut done = false;

        let jobs = self.jobs();
        for job in jobs.list(&ListParams::default()).await?.items {
            let view = job_view(&job);
            if view.active == 0 && view.succeeded > 0 {
                info!(job = %view.name, "deleting completed job");
                jobs.delete(&view.name, &DeleteParams::default()).await?;
                done = true;
            }
        }

        let pods = self.pods();
        for pod in pods.list(&ListParams::default()).await?.items {
            let view = pod_view(&pod);
            if view.phase == PodPhase::Succeeded {
                info!(pod = %view.name, "deleting completed pod");
                pods.delete(&view.name, &DeleteParams::default()).await?;
                done = true;
            }
        }

        Ok(done)
    }

    async fn delete_last_pending_workload(&self) -> Result<bool> {
        let jobs = self.jobs();
        let mut candidates: Vec<JobView> = jobs
            .list(&ListParams::default())
            .await?
            .items
            .iter()
            .map(job_view)
            .filter(|j| j.succeeded == 0)
            .collect();
        if candidates.is_empty() {
            return Ok(false);
        }
        candidates.sort_by_key(|j| j.created_at);

        let pending = self
            .pods()
            .list(&ListParams::default().fields("status.phase=Pending"))
            .await?;

        for candidate in &candidates {
            let owns_pending = pending.items.iter().any(|pod| {
                pod.metadata
                    .owner_references
                    .as_ref()
                    .is_some_and(|refs| {
                        refs.iter()
                            .any(|r| r.kind == "Job" && r.name == candidate.name)
                    })
            });
            if owns_pending {
                info!(job = %candidate.name, "deleting job with pending pods");
                jobs.delete(&candidate.name, &DeleteParams::foreground())
                    .await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn list_suspended_jobs(&self) -> Result<Vec<JobView>> {
        let jobs = self.jobs().list(&ListParams::default()).await?;
        Ok(jobs
            .items
            .iter()
            .map(job_view)
            .filter(|j| j.suspended)
            .collect())
    }

    async fn unsuspend_job(&self, name: &str) -> Result<()> {
        let patch = serde_json::json!({ "spec": { "suspend": false } });
        info!(job = %name, "releasing suspended job");
        self.jobs()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn is_node_name_valid(&self, name: &str) -> Result<bool> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        match nodes.get_opt(name).await {
            Ok(found) => Ok(found.is_some()),
            Err(e) => {
                warn!(node = %name, error = %e, "node lookup failed");
                Err(e.into())
            }
        }
    }
}
