//! Shared handler state.

use std::sync::Arc;

use joule_orchestrator::Orchestrator;

/// State shared by every handler: the orchestrator is the single entry
/// point for reads and state changes.
#[derive(Clone)]
pub struct ApiState {
    orchestrator: Arc<Orchestrator>,
}

impl ApiState {
    /// Creates the state.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// The orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }
}
