//! Server power switch.
//!
//! Samples rolling per-node utilization and powers off servers that stay
//! under the threshold. Each node carries an individual cooldown so the OS
//! gets to shut down before the next query, and so a node is not hammered
//! with chassis commands while telemetry lags behind reality.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use joule_bmc::ServerSwitch;
use joule_prom::MetricsSource;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::runtime::{Reconciler, StrategyRuntime};

/// Rolling average below which a node is considered idle, percent.
pub const MIN_AVG_TO_TURN_OFF: f64 = 10.0;

/// Per-node cooldown after a power-off command.
pub const POWER_OFF_COOLDOWN: Duration = Duration::from_secs(300);

/// Averaging window for the usage signal, minutes.
const USAGE_WINDOW_MINUTES: u32 = 5;

struct PowerCore {
    metrics: Arc<dyn MetricsSource>,
    switches: HashMap<String, Arc<ServerSwitch>>,
    cooldowns: Mutex<HashMap<String, DateTime<Utc>>>,
    cooldown: Duration,
}

impl PowerCore {
    fn in_cooldown(&self, node: &str, now: DateTime<Utc>) -> bool {
        self.cooldowns
            .lock()
            .get(node)
            .is_some_and(|until| *until > now)
    }

    fn arm_cooldown(&self, node: &str, now: DateTime<Utc>) {
        let until = now
            + chrono::Duration::from_std(self.cooldown)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        self.cooldowns.lock().insert(node.to_string(), until);
    }
}

#[async_trait]
impl Reconciler for PowerCore {
    async fn reconcile(&self) -> Result<()> {
        let averages = self.metrics.avg_cpu_usage(USAGE_WINDOW_MINUTES).await?;
        let now = Utc::now();

        for (node, switch) in &self.switches {
            if self.in_cooldown(node, now) {
                continue;
            }
            // A send error blocks inside the switch until the session is
            // reopened; the node is retried on the next pass.
            let is_on = match switch.is_power_on().await {
                Ok(on) => on,
                Err(e) => {
                    warn!(node = %node, endpoint = %switch.endpoint(), error = %e,
                        "power query failed");
                    continue;
                }
            };
            if !is_on {
                continue;
            }

            let Some(avg) = averages.iter().find(|a| &a.node_name == node).map(|a| a.avg)
            else {
                continue;
            };
            if avg < MIN_AVG_TO_TURN_OFF {
                info!(node = %node, avg, "node under-utilized, powering off");
                if let Err(e) = switch.power_off().await {
                    warn!(node = %node, error = %e, "power off failed");
                    continue;
                }
                self.arm_cooldown(node, now);
            }
        }
        Ok(())
    }
}

/// The server power on/off strategy.
pub struct ServerPowerStrategy {
    runtime: StrategyRuntime,
}

impl ServerPowerStrategy {
    /// Creates the strategy over one switch per managed node.
    #[must_use]
    pub fn new(
        metrics: Arc<dyn MetricsSource>,
        switches: HashMap<String, Arc<ServerSwitch>>,
    ) -> Self {
        Self::with_cooldown(metrics, switches, POWER_OFF_COOLDOWN)
    }

    /// Creates the strategy with a custom cooldown (tests).
    #[must_use]
    pub fn with_cooldown(
        metrics: Arc<dyn MetricsSource>,
        switches: HashMap<String, Arc<ServerSwitch>>,
        cooldown: Duration,
    ) -> Self {
        let core = Arc::new(PowerCore {
            metrics,
            switches,
            cooldowns: Mutex::new(HashMap::new()),
            cooldown,
        });
        Self {
            runtime: StrategyRuntime::new("server-power", core),
        }
    }

    /// Starts the strategy.
    pub async fn start(&self) {
        self.runtime.start().await;
    }

    /// Stops the strategy.
    pub async fn stop(&self) {
        self.runtime.stop().await;
    }

    /// Whether the strategy is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runtime.is_running()
    }
}
