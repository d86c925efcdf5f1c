//! Error types for time-series queries.

use thiserror::Error;

/// Result type for metrics queries.
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Errors that can occur while querying the time-series store.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Transport-level failure.
    #[error("metrics backend unreachable: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("metrics query failed: {message}")]
    BadResponse {
        /// Status or error string returned by the backend.
        message: String,
    },

    /// A sample value could not be interpreted.
    #[error("unparseable sample: {raw}")]
    BadSample {
        /// The offending raw value.
        raw: String,
    },

    /// A query that must return data returned none.
    #[error("no data for query: {query}")]
    NoData {
        /// The query that came back empty.
        query: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = MetricsError::NoData {
            query: "node_cpu_diff".into(),
        };
        assert_eq!(err.to_string(), "no data for query: node_cpu_diff");
    }
}
