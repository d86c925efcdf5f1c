//! Error type shared by all strategies.

use thiserror::Error;

use crate::submit::SubmitError;

/// Result type for reconcile passes.
pub type Result<T> = std::result::Result<T, StrategyError>;

/// Errors a reconcile pass can surface. The runtime logs them and moves on;
/// nothing here terminates a loop.
#[derive(Error, Debug)]
pub enum StrategyError {
    /// A cluster operation failed.
    #[error(transparent)]
    Cluster(#[from] joule_cluster::ClusterError),

    /// A metrics query failed.
    #[error(transparent)]
    Metrics(#[from] joule_prom::MetricsError),

    /// A BMC operation failed.
    #[error(transparent)]
    Bmc(#[from] joule_bmc::BmcError),

    /// Workload submission through the orchestrator failed.
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// The admission callback's owner is gone. Only possible during
    /// shutdown teardown.
    #[error("workload submitter dropped")]
    SubmitterGone,

    /// A node seen in telemetry has no core count sample.
    #[error("no core count for node: {node}")]
    MissingCoreCount {
        /// The affected node.
        node: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StrategyError::MissingCoreCount {
            node: "node-a".into(),
        };
        assert_eq!(err.to_string(), "no core count for node: node-a");
    }
}
