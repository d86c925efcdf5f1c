//! API error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced to HTTP callers.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request failed validation.
    #[error("{message}")]
    Validation {
        /// Human-readable explanation.
        message: String,
        /// Offending fields, when applicable (e.g. unknown node names).
        nodes: Option<Vec<String>>,
    },

    /// A backend call failed.
    #[error("{0}")]
    Backend(String),
}

impl ApiError {
    /// Creates a validation error without field details.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            nodes: None,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    nodes: Option<Vec<String>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, nodes) = match &self {
            Self::Validation { nodes, .. } => (StatusCode::BAD_REQUEST, nodes.clone()),
            Self::Backend(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        let body = ErrorBody {
            error: self.to_string(),
            nodes,
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<joule_orchestrator::OrchestratorError> for ApiError {
    fn from(err: joule_orchestrator::OrchestratorError) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<joule_cluster::ClusterError> for ApiError {
    fn from(err: joule_cluster::ClusterError) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<joule_prom::MetricsError> for ApiError {
    fn from(err: joule_prom::MetricsError) -> Self {
        Self::Backend(err.to_string())
    }
}
