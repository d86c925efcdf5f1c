//! Boot configuration.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// YAML boot configuration for the control plane.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootConfig {
    /// Metric name published for per-node targets.
    pub target_metric_name: String,
    /// Node name → initial target percentage.
    pub targets: HashMap<String, f64>,
    /// Predictor power-label → cluster node name.
    #[serde(default)]
    pub pyzhm_node_mappings: HashMap<String, String>,
    /// Cluster node name → BMC address.
    #[serde(default)]
    pub bmc_node_mappings: HashMap<String, String>,
    /// BMC credentials.
    #[serde(default)]
    pub bmc_username: String,
    /// BMC credentials.
    #[serde(default)]
    pub bmc_password: String,
    /// Descending setpoints for the target relaxer.
    #[serde(default)]
    pub setpoints: Vec<f64>,
}

impl BootConfig {
    /// Loads and parses the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or not valid YAML.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("error loading config file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("error parsing config file {}", path.display()))
    }
}
