//! Registry construction and text exposition.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use parking_lot::RwLock;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::cells::{SchedulableCell, SchedulableTable, TargetCell, TargetTable};

/// Metric name for the per-node schedulable flag. The target metric name is
/// configurable; this one is what the telemetry-aware scheduler polls.
pub const SCHEDULABLE_METRIC_NAME: &str = "schedulable";

const ENERGY_METRIC_NAME: &str = "fake_energy_consumption";

/// Boot-time energy seed for clusters without wattmeters, one entry per
/// rack position label known to the placement predictor.
pub const STATIC_ENERGY_SEED: &[(&str, f64)] = &[
    ("L1", 163.47),
    ("L3", 207.79),
    ("L5", 144.51),
    ("L7", 202.62),
    ("L9", 187.44),
    ("L11", 195.54),
    ("L13", 208.63),
    ("L15", 165.79),
    ("L17", 179.72),
    ("L19", 150.8),
    ("L21", 193.27),
    ("L23", 188.43),
    ("R1", 73.1),
    ("R3", 69.0),
    ("R5", 134.96),
    ("R7", 140.83),
    ("R9", 134.96),
    ("R11", 69.0),
    ("R13", 69.0),
    ("R15", 152.55),
    ("R17", 69.0),
    ("R19", 69.0),
    ("R21", 69.0),
    ("R23", 69.0),
];

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct InstanceLabels {
    instance: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct EnergyLabels {
    node_label: String,
}

/// Per-power-label energy consumption gauges.
#[derive(Clone, Debug, Default)]
pub struct EnergyGauges {
    family: Family<EnergyLabels, Gauge<f64, AtomicU64>>,
}

impl EnergyGauges {
    /// Sets the consumption (watts) for a power label.
    pub fn set(&self, label: &str, watts: f64) {
        self.family
            .get_or_create(&EnergyLabels {
                node_label: label.to_string(),
            })
            .set(watts);
    }

    /// Seeds every entry of a static scenario table.
    pub fn seed(&self, entries: &[(&str, f64)]) {
        for (label, watts) in entries {
            self.set(label, *watts);
        }
    }
}

/// Central metrics registry for Joule.
///
/// Owns the gauge families, hands out the target/schedulable tables built
/// from the boot configuration, and encodes the exposition served on the
/// metrics port.
pub struct MetricsHub {
    registry: Arc<RwLock<Registry>>,
    targets: Arc<TargetTable>,
    schedulable: Arc<SchedulableTable>,
    energy: EnergyGauges,
}

impl MetricsHub {
    /// Builds the registry and one target/schedulable cell per configured
    /// node. Targets start at their configured value; schedulable flags
    /// start false until the selector promotes a node.
    #[must_use]
    pub fn new(target_metric_name: &str, configured_targets: &HashMap<String, f64>) -> Self {
        let mut registry = Registry::default();

        let target_family = Family::<InstanceLabels, Gauge<f64, AtomicU64>>::default();
        registry.register(
            target_metric_name,
            "Per-node CPU utilization target in percent",
            target_family.clone(),
        );

        let schedulable_family = Family::<InstanceLabels, Gauge>::default();
        registry.register(
            SCHEDULABLE_METRIC_NAME,
            "Whether a node may accept new stress workloads (0/1)",
            schedulable_family.clone(),
        );

        let energy = EnergyGauges::default();
        registry.register(
            ENERGY_METRIC_NAME,
            "Current energy consumption per power label in watts",
            energy.family.clone(),
        );

        let mut target_cells = HashMap::new();
        let mut schedulable_cells = HashMap::new();
        for (node, target) in configured_targets {
            tracing::info!(node = %node, target = *target, "target loaded");
            let labels = InstanceLabels {
                instance: node.clone(),
            };
            let target_gauge = target_family.get_or_create(&labels).clone();
            target_cells.insert(node.clone(), TargetCell::new(target_gauge, *target));

            let schedulable_gauge = schedulable_family.get_or_create(&labels).clone();
            schedulable_cells.insert(node.clone(), SchedulableCell::new(schedulable_gauge, false));
        }

        Self {
            registry: Arc::new(RwLock::new(registry)),
            targets: Arc::new(TargetTable::new(target_cells)),
            schedulable: Arc::new(SchedulableTable::new(schedulable_cells)),
            energy,
        }
    }

    /// The per-node target table.
    #[must_use]
    pub fn targets(&self) -> Arc<TargetTable> {
        Arc::clone(&self.targets)
    }

    /// The per-node schedulable table.
    #[must_use]
    pub fn schedulable(&self) -> Arc<SchedulableTable> {
        Arc::clone(&self.schedulable)
    }

    /// The energy consumption gauges.
    #[must_use]
    pub fn energy(&self) -> EnergyGauges {
        self.energy.clone()
    }

    /// Encodes all metrics in the exposition text format.
    #[must_use]
    pub fn encode(&self) -> String {
        let registry = self.registry.read();
        let mut buffer = String::new();
        if encode(&mut buffer, &registry).is_err() {
            tracing::error!("failed to encode metrics");
            return String::new();
        }
        buffer
    }

    /// Content-Type header value for the exposition format.
    #[must_use]
    pub const fn content_type() -> &'static str {
        "application/openmetrics-text; version=1.0.0; charset=utf-8"
    }
}
