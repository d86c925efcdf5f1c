//! Self-driving CPU-limit adjuster.
//!
//! When a node's average diff leaves the slack band the delta is
//! redistributed across the stress pods on that node by patching per-pod
//! CPU limits, honouring each pod's declared minimum-CPU floor. A skiplist
//! remembers recently patched pods so two consecutive passes over the same
//! telemetry snapshot produce patches only once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use joule_cluster::{ClusterOps, CpuQuantity, PodView};
use joule_metrics::TargetTable;
use joule_prom::{avg_instant_usage, MetricsSource};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::runtime::{Reconciler, StrategyRuntime};

/// Diff band (±percent) inside which a node is left alone.
pub const ADJUSTMENT_SLACK: f64 = 5.0;

/// How long a patched pod stays in the skiplist.
pub const TIME_SINCE_INSERTION_THRESHOLD: Duration = Duration::from_secs(120);

/// Minimum settle time after a pod is scheduled before it is adjusted.
pub const TIME_SINCE_SCHEDULING_THRESHOLD: Duration = Duration::from_secs(60);

/// Pods carrying this marker belong to the telemetry-aware scheduler
/// infrastructure and are never touched.
const SCHEDULER_INFRA_MARKER: &str = "telemetry-aware-scheduling";

#[derive(Debug, Clone)]
struct SkipEntry {
    pod_name: String,
    inserted_at: DateTime<Utc>,
    #[allow(dead_code)]
    cpu_limit: CpuQuantity,
}

/// A pod's share of the redistribution, in percent of its node.
#[derive(Debug, Clone, PartialEq)]
struct PodShare {
    name: String,
    limit_percent: f64,
    min_percent: Option<f64>,
}

/// Computes per-pod limit deltas (percentage points) for one node.
///
/// Relaxing (`avg ≥ 0`) splits the headroom evenly across every eligible
/// pod, since growing a limit cannot violate a floor. Throttling
/// (`avg < 0`) only considers pods with a declared floor: pods whose floor
/// cannot absorb the average are clamped to exactly their floor, and the
/// remainder is split evenly across the rest.
fn compute_deltas(avg: f64, pods: &[PodShare]) -> Vec<(String, f64)> {
    if avg >= 0.0 {
        if pods.is_empty() {
            return Vec::new();
        }
        #[allow(clippy::cast_precision_loss)]
        let share = avg / pods.len() as f64;
        return pods
            .iter()
            .filter(|_| share.abs() > f64::EPSILON)
            .map(|p| (p.name.clone(), share))
            .collect();
    }

    let floored: Vec<&PodShare> = pods.iter().filter(|p| p.min_percent.is_some()).collect();
    if floored.is_empty() {
        return Vec::new();
    }

    let mut deltas = Vec::new();
    let mut unconstrained = Vec::new();
    let mut ignored_total = 0.0;
    for pod in &floored {
        let min = pod.min_percent.unwrap_or_default();
        if min - avg.abs() < 0.0 {
            // Clamp to the floor; this is all the pod can absorb.
            let clamped = min - pod.limit_percent;
            ignored_total += clamped;
            deltas.push((pod.name.clone(), clamped));
        } else {
            unconstrained.push(*pod);
        }
    }

    if !unconstrained.is_empty() {
        #[allow(clippy::cast_precision_loss)]
        let share = (avg - ignored_total) / unconstrained.len() as f64;
        for pod in unconstrained {
            deltas.push((pod.name.clone(), share));
        }
    }

    deltas.retain(|(_, delta)| delta.abs() > 1e-9);
    deltas
}

struct SelfDrivingCore {
    cluster: Arc<dyn ClusterOps>,
    metrics: Arc<dyn MetricsSource>,
    targets: Arc<TargetTable>,
    skiplist: Mutex<Vec<SkipEntry>>,
}

impl SelfDrivingCore {
    /// Drops aged-out entries and entries whose pod has terminated or
    /// disappeared.
    fn compact_skiplist(&self, now: DateTime<Utc>, pods: &[PodView]) {
        let mut skiplist = self.skiplist.lock();
        skiplist.retain(|entry| {
            let age = now.signed_duration_since(entry.inserted_at);
            if age.to_std().is_ok_and(|a| a > TIME_SINCE_INSERTION_THRESHOLD) {
                return false;
            }
            pods.iter()
                .any(|p| p.name == entry.pod_name && !p.phase.is_terminal())
        });
    }

    fn is_skipped(&self, pod: &str) -> bool {
        self.skiplist.lock().iter().any(|e| e.pod_name == pod)
    }

    fn eligible_on_node<'a>(
        &self,
        pods: &'a [PodView],
        node: &str,
        now: DateTime<Utc>,
    ) -> Vec<&'a PodView> {
        pods.iter()
            .filter(|p| p.node_name.as_deref() == Some(node))
            .filter(|p| p.phase == joule_cluster::PodPhase::Running)
            .filter(|p| !p.name.contains(SCHEDULER_INFRA_MARKER))
            .filter(|p| !self.is_skipped(&p.name))
            .filter(|p| {
                // Freshly scheduled pods have not produced stable samples.
                p.started_at.is_some_and(|started| {
                    now.signed_duration_since(started)
                        .to_std()
                        .is_ok_and(|age| age >= TIME_SINCE_SCHEDULING_THRESHOLD)
                })
            })
            .collect()
    }
}

#[async_trait]
impl Reconciler for SelfDrivingCore {
    async fn reconcile(&self) -> Result<()> {
        let diffs = self.metrics.current_cpu_diff().await?;
        if diffs.is_empty() {
            return Ok(());
        }
        let counts = self.metrics.cpu_counts().await?;
        let pods = self.cluster.list_pods().await?;
        let now = Utc::now();
        self.compact_skiplist(now, &pods);

        for series in &diffs {
            let avg = avg_instant_usage(&series.data);
            if avg.abs() <= ADJUSTMENT_SLACK {
                continue;
            }
            let target = self
                .targets
                .get(&series.node_name)
                .map_or(0.0, joule_metrics::TargetCell::get);
            debug!(
                node = %series.node_name,
                avg_diff = avg,
                target,
                "node outside slack band"
            );

            let Some(cores) = counts.get(&series.node_name).copied() else {
                warn!(node = %series.node_name, "no core count sample, skipping node");
                continue;
            };

            let eligible = self.eligible_on_node(&pods, &series.node_name, now);
            if eligible.is_empty() {
                continue;
            }

            let shares: Vec<PodShare> = eligible
                .iter()
                .filter_map(|p| {
                    p.cpu_limit.map(|limit| PodShare {
                        name: p.name.clone(),
                        limit_percent: limit.to_percentage(cores),
                        min_percent: p.min_cpu_percent,
                    })
                })
                .collect();

            let deltas = compute_deltas(avg, &shares);
            let by_name: HashMap<&str, &PodShare> =
                shares.iter().map(|s| (s.name.as_str(), s)).collect();

            for (pod_name, delta) in deltas {
                let Some(share) = by_name.get(pod_name.as_str()) else {
                    continue;
                };
                let new_limit =
                    CpuQuantity::from_percentage(share.limit_percent + delta, cores);
                debug!(
                    pod = %pod_name,
                    node = %series.node_name,
                    delta,
                    new_limit = %new_limit,
                    "patching pod cpu limit"
                );
                // A single patch failure aborts the tick; the next tick
                // recomputes from fresh telemetry.
                self.cluster.patch_cpu_limit(&pod_name, new_limit).await?;
                self.skiplist.lock().push(SkipEntry {
                    pod_name,
                    inserted_at: now,
                    cpu_limit: new_limit,
                });
            }
        }
        Ok(())
    }
}

/// The self-driving adjustment strategy.
pub struct SelfDrivingStrategy {
    runtime: StrategyRuntime,
}

impl SelfDrivingStrategy {
    /// Creates the adjuster.
    #[must_use]
    pub fn new(
        cluster: Arc<dyn ClusterOps>,
        metrics: Arc<dyn MetricsSource>,
        targets: Arc<TargetTable>,
    ) -> Self {
        let core = Arc::new(SelfDrivingCore {
            cluster,
            metrics,
            targets,
            skiplist: Mutex::new(Vec::new()),
        });
        Self {
            runtime: StrategyRuntime::new("self-driving", core),
        }
    }

    /// Starts the adjuster.
    pub async fn start(&self) {
        self.runtime.start().await;
    }

    /// Stops the adjuster.
    pub async fn stop(&self) {
        self.runtime.stop().await;
    }

    /// Whether the adjuster is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runtime.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use joule_cluster::{FakeCluster, PodPhase};
    use joule_prom::{InMemoryMetrics, InstantUsage, NodeCpuSeries};

    fn share(name: &str, limit: f64, min: Option<f64>) -> PodShare {
        PodShare {
            name: name.to_string(),
            limit_percent: limit,
            min_percent: min,
        }
    }

    mod delta_tests {
        use super::*;

        #[test]
        fn relax_splits_evenly() {
            let pods = vec![share("p1", 40.0, None), share("p2", 20.0, Some(10.0))];
            let deltas = compute_deltas(5.0, &pods);

            assert_eq!(deltas.len(), 2);
            for (_, delta) in &deltas {
                assert!((delta - 2.5).abs() < 1e-9);
            }
        }

        #[test]
        fn relax_with_no_pods_is_empty() {
            assert!(compute_deltas(5.0, &[]).is_empty());
        }

        #[test]
        fn throttle_skips_pods_without_floor() {
            // Target 50, actual 60: avg = -10. P3 has no floor annotation.
            let pods = vec![
                share("p1", 40.0, Some(30.0)),
                share("p2", 20.0, Some(15.0)),
                share("p3", 10.0, None),
            ];
            let deltas = compute_deltas(-10.0, &pods);

            assert_eq!(deltas.len(), 2);
            let p1 = deltas.iter().find(|(n, _)| n == "p1").unwrap();
            let p2 = deltas.iter().find(|(n, _)| n == "p2").unwrap();
            assert!((p1.1 + 5.0).abs() < 1e-9);
            assert!((p2.1 + 5.0).abs() < 1e-9);
            assert!(!deltas.iter().any(|(n, _)| n == "p3"));
        }

        #[test]
        fn throttle_clamps_constrained_pod_to_floor() {
            let pods = vec![share("p1", 12.0, Some(4.0)), share("p2", 40.0, Some(30.0))];
            let deltas = compute_deltas(-10.0, &pods);

            // p1's floor (4) is below |avg| (10): clamp to the floor.
            let p1 = deltas.iter().find(|(n, _)| n == "p1").unwrap();
            assert!((p1.1 + 8.0).abs() < 1e-9);
            assert!((pods[0].limit_percent + p1.1 - 4.0).abs() < 1e-9);

            // p2 takes the remainder: (-10 - (-8)) / 1 = -2.
            let p2 = deltas.iter().find(|(n, _)| n == "p2").unwrap();
            assert!((p2.1 + 2.0).abs() < 1e-9);
        }

        #[test]
        fn throttle_with_only_unfloored_pods_is_empty() {
            let pods = vec![share("p1", 40.0, None), share("p2", 20.0, None)];
            assert!(compute_deltas(-10.0, &pods).is_empty());
        }

        #[test]
        fn floor_invariant_holds_after_one_pass() {
            let pods = vec![
                share("p1", 40.0, Some(30.0)),
                share("p2", 20.0, Some(15.0)),
                share("p3", 12.0, Some(4.0)),
            ];
            let deltas = compute_deltas(-10.0, &pods);
            for (name, delta) in &deltas {
                let pod = pods.iter().find(|p| &p.name == name).unwrap();
                let new_limit = pod.limit_percent + delta;
                assert!(
                    new_limit >= pod.min_percent.unwrap() - 1e-9,
                    "{name}: {new_limit} subceeds floor"
                );
            }
        }
    }

    mod reconcile_tests {
        use super::*;

        fn settled_pod(name: &str, node: &str, limit_millis: i64, min: Option<f64>) -> PodView {
            PodView {
                name: name.to_string(),
                node_name: Some(node.to_string()),
                phase: PodPhase::Running,
                created_at: Some(Utc::now() - ChronoDuration::seconds(600)),
                started_at: Some(Utc::now() - ChronoDuration::seconds(600)),
                cpu_limit: Some(CpuQuantity::from_millis(limit_millis)),
                min_cpu_percent: min,
            }
        }

        fn diff_series(node: &str, diff: f64) -> NodeCpuSeries {
            NodeCpuSeries {
                node_name: node.to_string(),
                data: vec![InstantUsage {
                    timestamp: Utc::now(),
                    usage: diff,
                }],
            }
        }

        struct Rig {
            cluster: Arc<FakeCluster>,
            metrics: Arc<InMemoryMetrics>,
            core: SelfDrivingCore,
        }

        fn make_rig() -> Rig {
            let cluster = Arc::new(FakeCluster::new());
            let metrics = Arc::new(InMemoryMetrics::new());
            metrics.set_cpu_count("node-a", 10);
            let targets = joule_metrics::MetricsHub::new(
                "cpu_target",
                &std::collections::HashMap::from([("node-a".to_string(), 50.0)]),
            )
            .targets();
            let core = SelfDrivingCore {
                cluster: cluster.clone(),
                metrics: metrics.clone(),
                targets,
                skiplist: Mutex::new(Vec::new()),
            };
            Rig {
                cluster,
                metrics,
                core,
            }
        }

        #[tokio::test]
        async fn throttles_pods_and_respects_floor() {
            let rig = make_rig();
            // 10 cores: 40% = 4000m, 20% = 2000m.
            rig.cluster.set_pods(vec![
                settled_pod("p1", "node-a", 4000, Some(30.0)),
                settled_pod("p2", "node-a", 2000, Some(15.0)),
                settled_pod("p3", "node-a", 1000, None),
            ]);
            rig.metrics.set_diffs(vec![diff_series("node-a", -10.0)]);

            rig.core.reconcile().await.unwrap();

            // Each floored pod shed 5 percentage points (500m).
            assert_eq!(rig.cluster.pod_cpu_limit("p1").unwrap().millis(), 3500);
            assert_eq!(rig.cluster.pod_cpu_limit("p2").unwrap().millis(), 1500);
            assert_eq!(rig.cluster.pod_cpu_limit("p3").unwrap().millis(), 1000);
        }

        #[tokio::test]
        async fn relaxes_pods_evenly() {
            let rig = make_rig();
            rig.cluster.set_pods(vec![
                settled_pod("p1", "node-a", 2000, None),
                settled_pod("p2", "node-a", 3000, None),
            ]);
            rig.metrics.set_diffs(vec![diff_series("node-a", 6.0)]);

            rig.core.reconcile().await.unwrap();

            // +3 percentage points each on 10 cores = +300m.
            assert_eq!(rig.cluster.pod_cpu_limit("p1").unwrap().millis(), 2300);
            assert_eq!(rig.cluster.pod_cpu_limit("p2").unwrap().millis(), 3300);
        }

        #[tokio::test]
        async fn second_pass_on_same_snapshot_is_idempotent() {
            let rig = make_rig();
            rig.cluster
                .set_pods(vec![settled_pod("p1", "node-a", 4000, Some(30.0))]);
            rig.metrics.set_diffs(vec![diff_series("node-a", -10.0)]);

            rig.core.reconcile().await.unwrap();
            let patches_after_first = rig.cluster.patches().len();
            assert_eq!(patches_after_first, 1);

            rig.core.reconcile().await.unwrap();
            assert_eq!(rig.cluster.patches().len(), patches_after_first);
        }

        #[tokio::test]
        async fn within_slack_does_nothing() {
            let rig = make_rig();
            rig.cluster
                .set_pods(vec![settled_pod("p1", "node-a", 4000, Some(30.0))]);
            // Exactly ±slack is not a violation.
            rig.metrics.set_diffs(vec![diff_series("node-a", -ADJUSTMENT_SLACK)]);

            rig.core.reconcile().await.unwrap();
            assert!(rig.cluster.patches().is_empty());
        }

        #[tokio::test]
        async fn empty_pod_list_produces_no_patches() {
            let rig = make_rig();
            rig.metrics.set_diffs(vec![diff_series("node-a", -10.0)]);

            rig.core.reconcile().await.unwrap();
            assert!(rig.cluster.patches().is_empty());
        }

        #[tokio::test]
        async fn scheduler_infra_and_fresh_pods_are_skipped() {
            let rig = make_rig();
            let mut fresh = settled_pod("p-fresh", "node-a", 2000, Some(10.0));
            fresh.started_at = Some(Utc::now());
            rig.cluster.set_pods(vec![
                settled_pod("telemetry-aware-scheduling-xyz", "node-a", 2000, Some(10.0)),
                fresh,
            ]);
            rig.metrics.set_diffs(vec![diff_series("node-a", -10.0)]);

            rig.core.reconcile().await.unwrap();
            assert!(rig.cluster.patches().is_empty());
        }

        #[tokio::test]
        async fn patch_failure_aborts_tick() {
            let rig = make_rig();
            rig.cluster
                .set_pods(vec![settled_pod("p1", "node-a", 4000, Some(30.0))]);
            rig.cluster.fail_patches(true);
            rig.metrics.set_diffs(vec![diff_series("node-a", -10.0)]);

            assert!(rig.core.reconcile().await.is_err());
        }

        #[tokio::test]
        async fn skiplist_drops_terminated_pods() {
            let rig = make_rig();
            let mut pod = settled_pod("p1", "node-a", 4000, Some(30.0));
            rig.cluster.set_pods(vec![pod.clone()]);
            rig.metrics.set_diffs(vec![diff_series("node-a", -10.0)]);

            rig.core.reconcile().await.unwrap();
            assert_eq!(rig.cluster.patches().len(), 1);

            // The pod finishes and restarts fresh under the same name.
            pod.phase = PodPhase::Succeeded;
            rig.cluster.set_pods(vec![pod.clone()]);
            rig.core.reconcile().await.unwrap();

            pod.phase = PodPhase::Running;
            pod.cpu_limit = Some(CpuQuantity::from_millis(4000));
            rig.cluster.set_pods(vec![pod]);
            rig.core.reconcile().await.unwrap();
            assert_eq!(rig.cluster.patches().len(), 2);
        }
    }
}
