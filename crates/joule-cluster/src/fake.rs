//! In-memory cluster double for tests and local development.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::client::ClusterOps;
use crate::error::{ClusterError, Result};
use crate::job::StressJob;
use crate::quantity::CpuQuantity;
use crate::types::{JobView, PodPhase, PodView};

#[derive(Debug, Default)]
struct FakeState {
    pods: Vec<PodView>,
    jobs: Vec<JobView>,
    created: Vec<StressJob>,
    patches: Vec<(String, CpuQuantity)>,
    unsuspended: Vec<String>,
    valid_nodes: Vec<String>,
    fail_patches: bool,
}

/// In-memory [`ClusterOps`] implementation.
///
/// Patches are applied to the stored pod views so repeated reconciles
/// observe their own writes, and every mutation is recorded for assertions.
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    /// Creates an empty fake cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pod.
    pub fn push_pod(&self, pod: PodView) {
        self.state.lock().pods.push(pod);
    }

    /// Replaces all pods.
    pub fn set_pods(&self, pods: Vec<PodView>) {
        self.state.lock().pods = pods;
    }

    /// Adds a job view (e.g. an already-suspended job).
    pub fn push_job(&self, job: JobView) {
        self.state.lock().jobs.push(job);
    }

    /// Restricts which node names validate. An empty list accepts all.
    pub fn set_valid_nodes(&self, nodes: Vec<String>) {
        self.state.lock().valid_nodes = nodes;
    }

    /// Makes every subsequent patch fail.
    pub fn fail_patches(&self, fail: bool) {
        self.state.lock().fail_patches = fail;
    }

    /// Stress jobs created so far.
    #[must_use]
    pub fn created_jobs(&self) -> Vec<StressJob> {
        self.state.lock().created.clone()
    }

    /// Patches applied so far, in order.
    #[must_use]
    pub fn patches(&self) -> Vec<(String, CpuQuantity)> {
        self.state.lock().patches.clone()
    }

    /// Jobs released so far.
    #[must_use]
    pub fn unsuspended(&self) -> Vec<String> {
        self.state.lock().unsuspended.clone()
    }

    /// Current limit of a pod, after any patches.
    #[must_use]
    pub fn pod_cpu_limit(&self, pod: &str) -> Option<CpuQuantity> {
        self.state
            .lock()
            .pods
            .iter()
            .find(|p| p.name == pod)
            .and_then(|p| p.cpu_limit)
    }
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn list_pods(&self) -> Result<Vec<PodView>> {
        Ok(self.state.lock().pods.clone())
    }

    async fn pod_node_name(&self, pod: &str) -> Result<Option<String>> {
        let state = self.state.lock();
        let found = state
            .pods
            .iter()
            .find(|p| p.name == pod)
            .ok_or_else(|| ClusterError::PodNotFound {
                name: pod.to_string(),
            })?;
        if found.phase == PodPhase::Running {
            Ok(found.node_name.clone())
        } else {
            Ok(None)
        }
    }

    async fn patch_cpu_limit(&self, pod: &str, limit: CpuQuantity) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_patches {
            return Err(ClusterError::PodNotFound {
                name: pod.to_string(),
            });
        }
        let found = state
            .pods
            .iter_mut()
            .find(|p| p.name == pod)
            .ok_or_else(|| ClusterError::PodNotFound {
                name: pod.to_string(),
            })?;
        found.cpu_limit = Some(limit);
        state.patches.push((pod.to_string(), limit));
        Ok(())
    }

    async fn create_job(&self, job: &StressJob) -> Result<()> {
        let mut state = self.state.lock();
        state.jobs.push(JobView {
            name: job.name.clone(),
            suspended: job.is_deferred(Utc::now()),
            start_after: job.start_after,
            succeeded: 0,
            active: 0,
            created_at: Some(Utc::now()),
        });
        state.created.push(job.clone());
        Ok(())
    }

    async fn clear_completed_workloads(&self) -> Result<bool> {
        let mut state = self.state.lock();
        let before = state.pods.len() + state.jobs.len();
        state.pods.retain(|p| p.phase != PodPhase::Succeeded);
        state.jobs.retain(|j| j.succeeded == 0 || j.active > 0);
        Ok(state.pods.len() + state.jobs.len() < before)
    }

    async fn delete_last_pending_workload(&self) -> Result<bool> {
        let mut state = self.state.lock();
        let mut candidates: Vec<String> = state
            .jobs
            .iter()
            .filter(|j| j.succeeded == 0)
            .map(|j| j.name.clone())
            .collect();
        candidates.sort();
        if let Some(name) = candidates.first() {
            let name = name.clone();
            state.jobs.retain(|j| j.name != name);
            return Ok(true);
        }
        Ok(false)
    }

    async fn list_suspended_jobs(&self) -> Result<Vec<JobView>> {
        Ok(self
            .state
            .lock()
            .jobs
            .iter()
            .filter(|j| j.suspended)
            .cloned()
            .collect())
    }

    async fn unsuspend_job(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(job) = state.jobs.iter_mut().find(|j| j.name == name) {
            job.suspended = false;
        }
        state.unsuspended.push(name.to_string());
        Ok(())
    }

    async fn is_node_name_valid(&self, name: &str) -> Result<bool> {
        let state = self.state.lock();
        Ok(state.valid_nodes.is_empty() || state.valid_nodes.iter().any(|n| n == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_pod(name: &str, node: &str, limit_millis: i64) -> PodView {
        PodView {
            name: name.to_string(),
            node_name: Some(node.to_string()),
            phase: PodPhase::Running,
            created_at: Some(Utc::now()),
            started_at: Some(Utc::now()),
            cpu_limit: Some(CpuQuantity::from_millis(limit_millis)),
            min_cpu_percent: None,
        }
    }

    #[tokio::test]
    async fn patch_updates_stored_pod() {
        let cluster = FakeCluster::new();
        cluster.push_pod(running_pod("p1", "node-a", 400));

        cluster
            .patch_cpu_limit("p1", CpuQuantity::from_millis(300))
            .await
            .unwrap();

        assert_eq!(cluster.pod_cpu_limit("p1"), Some(CpuQuantity::from_millis(300)));
        assert_eq!(cluster.patches().len(), 1);
    }

    #[tokio::test]
    async fn pod_node_name_requires_running() {
        let cluster = FakeCluster::new();
        let mut pod = running_pod("p1", "node-a", 400);
        pod.phase = PodPhase::Pending;
        cluster.push_pod(pod);

        assert_eq!(cluster.pod_node_name("p1").await.unwrap(), None);
        assert!(cluster.pod_node_name("nope").await.is_err());
    }

    #[tokio::test]
    async fn unsuspend_marks_job() {
        let cluster = FakeCluster::new();
        cluster.push_job(JobView {
            name: "j1".to_string(),
            suspended: true,
            start_after: None,
            succeeded: 0,
            active: 0,
            created_at: Some(Utc::now()),
        });

        assert_eq!(cluster.list_suspended_jobs().await.unwrap().len(), 1);
        cluster.unsuspend_job("j1").await.unwrap();
        assert!(cluster.list_suspended_jobs().await.unwrap().is_empty());
        assert_eq!(cluster.unsuspended(), vec!["j1".to_string()]);
    }
}
