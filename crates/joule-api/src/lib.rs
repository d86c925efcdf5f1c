//! HTTP/JSON API for the Joule dashboard.
//!
//! All state changes go through the orchestrator; no handler drives a
//! strategy or adapter beyond what the orchestrator exposes. Routes live
//! under `/api/v1`; the metrics exposition gets its own tiny router served
//! on a separate port.

#![forbid(unsafe_code)]

mod error;
mod handlers;
mod routes;
mod server;
mod state;

pub use error::ApiError;
pub use routes::{create_router, metrics_router};
pub use server::serve;
pub use state::ApiState;
