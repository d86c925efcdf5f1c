//! Error types for cluster operations.

use thiserror::Error;

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors that can occur while talking to the cluster.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// The Kubernetes API rejected or failed a call.
    #[error("kubernetes api error: {0}")]
    Api(#[from] kube::Error),

    /// A CPU quantity string could not be parsed.
    #[error("invalid cpu quantity: {raw}")]
    InvalidQuantity {
        /// The offending raw string.
        raw: String,
    },

    /// A pod lookup came back empty.
    #[error("pod not found: {name}")]
    PodNotFound {
        /// Name of the missing pod.
        name: String,
    },

    /// A pod has no containers to adjust.
    #[error("pod has no containers: {name}")]
    NoContainers {
        /// Name of the pod.
        name: String,
    },

    /// A stress job was built without a required field.
    #[error("job spec incomplete: {field} is required")]
    MissingJobField {
        /// Name of the missing field.
        field: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ClusterError::InvalidQuantity {
            raw: "12parsecs".into(),
        };
        assert_eq!(err.to_string(), "invalid cpu quantity: 12parsecs");

        let err = ClusterError::MissingJobField { field: "cpu_limit" };
        assert_eq!(err.to_string(), "job spec incomplete: cpu_limit is required");
    }
}
