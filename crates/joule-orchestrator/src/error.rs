//! Error type for admission and lifecycle operations.

use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors the admission pipeline can return to its caller.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A cluster operation failed.
    #[error(transparent)]
    Cluster(#[from] joule_cluster::ClusterError),

    /// A metrics query failed.
    #[error(transparent)]
    Metrics(#[from] joule_prom::MetricsError),

    /// The placement predictor failed or answered incompletely.
    #[error(transparent)]
    Predictor(#[from] joule_pyzhm::PyzhmError),

    /// No nodes are configured, so no representative node exists for
    /// percent/quantity conversion.
    #[error("no nodes configured")]
    NoConfiguredNodes,

    /// A node seen in configuration has no core count sample.
    #[error("no core count for node: {node}")]
    MissingCoreCount {
        /// The affected node.
        node: String,
    },

    /// The predictor answered with a power label missing from the
    /// node-mapping table.
    #[error("unknown power label: {label}")]
    UnknownPowerLabel {
        /// The unmapped label.
        label: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = OrchestratorError::UnknownPowerLabel { label: "L99".into() };
        assert_eq!(err.to_string(), "unknown power label: L99");
    }
}
