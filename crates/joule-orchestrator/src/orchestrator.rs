//! The orchestrator proper.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use joule_bmc::ServerSwitch;
use joule_cluster::{generate_job_name, ClusterOps, CpuQuantity, StressJob};
use joule_metrics::{SchedulableTable, TargetTable};
use joule_prom::MetricsSource;
use joule_pyzhm::{Predictor, Scenario};
use joule_strategies::{
    AutomaticJobSpawn, SchedulableStrategy, SelfDrivingStrategy, ServerPowerStrategy, SubmitError,
    TargetRelaxStrategy, TawaStrategy, WorkloadRequest, WorkloadSubmitter,
};
use tracing::{debug, error, info};

use crate::error::{OrchestratorError, Result};
use crate::release::release_due_jobs;

/// How often the release loop scans for due suspended jobs.
const RELEASE_INTERVAL: Duration = Duration::from_secs(3);

/// Job id used in single-job prediction requests.
const PREDICTION_JOB_ID: &str = "job1";

/// Static configuration the orchestrator needs beyond its collaborators.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Predictor power-label → cluster node name.
    pub pyzhm_node_mappings: HashMap<String, String>,
    /// Descending setpoints for the target relaxer.
    pub setpoints: Vec<f64>,
}

/// Creates and coordinates the scheduling strategies, and admits workloads.
pub struct Orchestrator {
    cluster: Arc<dyn ClusterOps>,
    metrics: Arc<dyn MetricsSource>,
    predictor: Arc<dyn Predictor>,
    targets: Arc<TargetTable>,
    schedulable: Arc<SchedulableTable>,
    pyzhm_node_mappings: HashMap<String, String>,

    self_driving: SelfDrivingStrategy,
    schedulable_strategy: SchedulableStrategy,
    tawa: TawaStrategy,
    power: ServerPowerStrategy,
    relaxer: TargetRelaxStrategy,
    job_spawn: OnceLock<AutomaticJobSpawn>,
}

impl Orchestrator {
    /// Creates the orchestrator and all strategies, none of them running
    /// yet. Call [`Self::bootstrap`] to start the boot-time default set.
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterOps>,
        metrics: Arc<dyn MetricsSource>,
        predictor: Arc<dyn Predictor>,
        targets: Arc<TargetTable>,
        schedulable: Arc<SchedulableTable>,
        switches: HashMap<String, Arc<ServerSwitch>>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        let self_driving =
            SelfDrivingStrategy::new(cluster.clone(), metrics.clone(), targets.clone());
        let schedulable_strategy =
            SchedulableStrategy::new(metrics.clone(), schedulable.clone());
        let relaxer =
            TargetRelaxStrategy::new(metrics.clone(), targets.clone(), config.setpoints.clone());
        let power = ServerPowerStrategy::new(metrics.clone(), switches);

        Arc::new(Self {
            cluster,
            metrics,
            predictor,
            targets,
            schedulable,
            pyzhm_node_mappings: config.pyzhm_node_mappings,
            self_driving,
            schedulable_strategy,
            tawa: TawaStrategy::new(),
            power,
            relaxer,
            job_spawn: OnceLock::new(),
        })
    }

    /// Starts the boot-time defaults — schedulable selection, target
    /// relaxation, server power switching, the suspended-job release loop —
    /// and wires the automatic-spawn strategy to the admission pipeline.
    /// Self-driving, TAWA, and automatic spawn stay off until enabled.
    pub async fn bootstrap(self: &Arc<Self>) {
        let submitter = Arc::downgrade(self) as Weak<dyn WorkloadSubmitter>;
        let spawn = AutomaticJobSpawn::new(self.metrics.clone(), submitter);
        // First and only wiring; a second bootstrap keeps the original.
        let _ = self.job_spawn.set(spawn);

        self.schedulable_strategy.start().await;
        self.relaxer.start().await;
        self.power.start().await;

        let cluster = self.cluster.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(RELEASE_INTERVAL).await;
                if let Err(e) = release_due_jobs(cluster.as_ref(), Utc::now()).await {
                    error!(error = %e, "suspended-job release cycle failed");
                }
            }
        });
        info!("orchestrator bootstrapped");
    }

    /// The shared cluster adapter.
    #[must_use]
    pub fn cluster(&self) -> Arc<dyn ClusterOps> {
        self.cluster.clone()
    }

    /// The shared metrics source.
    #[must_use]
    pub fn metrics(&self) -> Arc<dyn MetricsSource> {
        self.metrics.clone()
    }

    /// The per-node target table.
    #[must_use]
    pub fn targets(&self) -> Arc<TargetTable> {
        self.targets.clone()
    }

    /// The per-node schedulable table.
    #[must_use]
    pub fn schedulable(&self) -> Arc<SchedulableTable> {
        self.schedulable.clone()
    }

    /// Starts the self-driving adjuster.
    pub async fn start_self_driving(&self) {
        self.self_driving.start().await;
    }

    /// Stops the self-driving adjuster.
    pub async fn stop_self_driving(&self) {
        self.self_driving.stop().await;
    }

    /// Whether the self-driving adjuster is running.
    #[must_use]
    pub fn is_self_driving_enabled(&self) -> bool {
        self.self_driving.is_running()
    }

    /// Starts the schedulable selector.
    pub async fn start_schedulable(&self) {
        self.schedulable_strategy.start().await;
    }

    /// Stops the schedulable selector (fails open).
    pub async fn stop_schedulable(&self) {
        self.schedulable_strategy.stop().await;
    }

    /// Whether the schedulable selector is running.
    #[must_use]
    pub fn is_schedulable_enabled(&self) -> bool {
        self.schedulable_strategy.is_running()
    }

    /// Enables energy-aware placement.
    pub async fn start_tawa(&self) {
        self.tawa.start().await;
    }

    /// Disables energy-aware placement.
    pub async fn stop_tawa(&self) {
        self.tawa.stop().await;
    }

    /// Whether energy-aware placement is enabled.
    #[must_use]
    pub fn is_tawa_enabled(&self) -> bool {
        self.tawa.is_enabled()
    }

    /// Starts automatic job spawn. No-op before [`Self::bootstrap`].
    pub async fn start_automatic_job_spawn(&self) {
        if let Some(spawn) = self.job_spawn.get() {
            spawn.start().await;
        }
    }

    /// Stops automatic job spawn.
    pub async fn stop_automatic_job_spawn(&self) {
        if let Some(spawn) = self.job_spawn.get() {
            spawn.stop().await;
        }
    }

    /// Whether automatic job spawn is running.
    #[must_use]
    pub fn is_automatic_job_spawn_enabled(&self) -> bool {
        self.job_spawn.get().is_some_and(AutomaticJobSpawn::is_running)
    }

    /// Stops the always-on housekeeping strategies. Used at shutdown.
    pub async fn stop_housekeeping(&self) {
        self.relaxer.stop().await;
        self.power.stop().await;
    }

    /// Admits one workload: converts the target, optionally asks the
    /// predictor for an energy-optimal host, renders and creates the job.
    ///
    /// Returns the created job's name.
    ///
    /// # Errors
    ///
    /// Any pipeline step's error is returned to the caller; nothing is
    /// retried and no partial state is left behind.
    pub async fn add_workload(&self, request: WorkloadRequest) -> Result<String> {
        let counts = self.metrics.cpu_counts().await?;
        // Percent/quantity conversion for an undecided node goes through a
        // representative, assuming homogeneous core counts.
        let representative = self
            .targets
            .representative_node()
            .ok_or(OrchestratorError::NoConfiguredNodes)?;
        let cores = counts.get(representative).copied().ok_or_else(|| {
            OrchestratorError::MissingCoreCount {
                node: representative.to_string(),
            }
        })?;
        let cpu_limit = CpuQuantity::from_percentage(request.cpu_target, cores);

        let name = request
            .name
            .clone()
            .unwrap_or_else(|| generate_job_name(request.cpu_target));
        let mut builder = StressJob::builder()
            .name(name.clone())
            .cpu_limit(cpu_limit)
            .cpu_count(request.cpu_count)
            .length(Duration::from_secs(request.job_length * 60))
            .min_cpu(request.min_cpu.unwrap_or(0.0));
        if let Some(kind) = request.kind {
            builder = builder.workload_kind(kind);
        }
        if let Some(start) = request.start_after {
            builder = builder.start_after(start);
        }

        if self.is_tawa_enabled() {
            if let Some(node) = self.predict_host(&request, cpu_limit).await? {
                builder = builder.host_selector(node);
            }
        }

        let job = builder.build()?;
        self.cluster.create_job(&job).await?;
        info!(job = %name, cpu_target = request.cpu_target, "workload admitted");
        Ok(name)
    }

    /// Runs the placement pipeline: scenario → predictor → node mapping →
    /// headroom check. Returns `None` when the predicted node has no
    /// headroom, leaving placement to the cluster's default scheduler.
    async fn predict_host(
        &self,
        request: &WorkloadRequest,
        cpu_limit: CpuQuantity,
    ) -> Result<Option<String>> {
        let consumption = match &request.scenario {
            Some(scenario) => scenario.clone(),
            None => self.metrics.current_energy_consumption().await?,
        };

        #[allow(clippy::cast_precision_loss)]
        let required_cores = cpu_limit.cores_ceil() as f64;
        let scenario = Scenario {
            scenario: consumption,
            requirements: HashMap::from([(PREDICTION_JOB_ID.to_string(), required_cores)]),
        };

        let predictions = self.predictor.predict(scenario).await?;
        let label = predictions.assignment(PREDICTION_JOB_ID)?;
        let node = self.pyzhm_node_mappings.get(label).ok_or_else(|| {
            OrchestratorError::UnknownPowerLabel {
                label: label.to_string(),
            }
        })?;

        let diff = self.metrics.node_cpu_diff(node).await?;
        if diff > 0.0 {
            Ok(Some(node.clone()))
        } else {
            debug!(
                node = %node,
                diff,
                "predicted node has no headroom, leaving placement to the scheduler"
            );
            Ok(None)
        }
    }
}

#[async_trait]
impl WorkloadSubmitter for Orchestrator {
    async fn submit(&self, request: WorkloadRequest) -> std::result::Result<String, SubmitError> {
        self.add_workload(request)
            .await
            .map_err(|e| SubmitError(e.to_string()))
    }
}
