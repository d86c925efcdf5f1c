//! Automatic job spawn.
//!
//! While at least one node has headroom, synthesizes small stress jobs to
//! keep utilization near target. Bursts are capped per node and the counter
//! resets on a cooldown, so a slow cluster never accumulates a backlog of
//! synthetic work.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use joule_prom::MetricsSource;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StrategyError};
use crate::runtime::{Reconciler, StrategyRuntime};
use crate::submit::{WorkloadRequest, WorkloadSubmitter};

/// CPU target of each synthetic job, percent.
pub const SPAWN_JOB_CPU_PERCENTAGE: f64 = 10.0;

/// Maximum spawns per node within one burst window.
pub const MAX_BURST_PER_NODE: u32 = 4;

/// Cooldown before the burst counter resets.
pub const BURST_RESET_TIMEOUT: Duration = Duration::from_secs(60);

/// Extra sleep after each pass; this loop runs slower than the base tick.
const RECONCILIATION_DELAY: Duration = Duration::from_secs(20);

/// Length of each synthetic job, minutes.
const SPAWN_JOB_LENGTH_MINUTES: u64 = 5;

#[derive(Debug)]
struct BurstState {
    reset_time: DateTime<Utc>,
    spawn_count: u32,
}

fn should_reset(state: &BurstState, now: DateTime<Utc>) -> bool {
    state.reset_time < now && state.spawn_count >= MAX_BURST_PER_NODE
}

fn should_spawn(diff: f64, state: &BurstState, now: DateTime<Utc>) -> bool {
    diff >= 0.0 && state.spawn_count < MAX_BURST_PER_NODE && state.reset_time < now
}

struct SpawnCore {
    metrics: Arc<dyn MetricsSource>,
    submitter: Weak<dyn WorkloadSubmitter>,
    state: Mutex<BurstState>,
    extra_delay: Duration,
}

#[async_trait]
impl Reconciler for SpawnCore {
    async fn reconcile(&self) -> Result<()> {
        debug!("reconciling automatic job spawn");
        let diffs = self.metrics.current_cpu_diff().await?;

        for series in &diffs {
            let now = Utc::now();
            {
                let mut state = self.state.lock();
                if should_reset(&state, now) {
                    state.spawn_count = 0;
                    state.reset_time = now
                        + chrono::Duration::from_std(BURST_RESET_TIMEOUT)
                            .unwrap_or_else(|_| chrono::Duration::seconds(60));
                }
            }

            let Some(diff) = series.last_usage() else {
                continue;
            };
            let spawn = {
                let state = self.state.lock();
                should_spawn(diff, &state, now)
            };
            if !spawn {
                continue;
            }

            info!(
                node = %series.node_name,
                diff,
                "node has headroom, spawning a synthetic job"
            );
            let counts = self.metrics.cpu_counts().await?;
            let cpu_count = counts.get(&series.node_name).copied().ok_or_else(|| {
                StrategyError::MissingCoreCount {
                    node: series.node_name.clone(),
                }
            })?;

            let submitter = self
                .submitter
                .upgrade()
                .ok_or(StrategyError::SubmitterGone)?;
            submitter
                .submit(WorkloadRequest {
                    cpu_target: SPAWN_JOB_CPU_PERCENTAGE,
                    job_length: SPAWN_JOB_LENGTH_MINUTES,
                    cpu_count,
                    scenario: Some(HashMap::new()),
                    ..WorkloadRequest::default()
                })
                .await?;
            self.state.lock().spawn_count += 1;
            // One spawn per pass; let telemetry catch up first.
            break;
        }

        tokio::time::sleep(self.extra_delay).await;
        Ok(())
    }
}

/// The automatic job-spawn strategy.
pub struct AutomaticJobSpawn {
    runtime: StrategyRuntime,
}

impl AutomaticJobSpawn {
    /// Creates the spawner. The submitter is held weakly to break the
    /// orchestrator ↔ strategy cycle.
    #[must_use]
    pub fn new(metrics: Arc<dyn MetricsSource>, submitter: Weak<dyn WorkloadSubmitter>) -> Self {
        Self::with_delay(metrics, submitter, RECONCILIATION_DELAY)
    }

    /// Creates the spawner with a custom extra delay (tests).
    #[must_use]
    pub fn with_delay(
        metrics: Arc<dyn MetricsSource>,
        submitter: Weak<dyn WorkloadSubmitter>,
        extra_delay: Duration,
    ) -> Self {
        let core = Arc::new(SpawnCore {
            metrics,
            submitter,
            state: Mutex::new(BurstState {
                reset_time: Utc::now(),
                spawn_count: 0,
            }),
            extra_delay,
        });
        Self {
            runtime: StrategyRuntime::new("automatic-job-spawn", core),
        }
    }

    /// Starts the spawner.
    pub async fn start(&self) {
        self.runtime.start().await;
    }

    /// Stops the spawner.
    pub async fn stop(&self) {
        self.runtime.stop().await;
    }

    /// Whether the spawner is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runtime.is_running()
    }
}
