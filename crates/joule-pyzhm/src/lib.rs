//! Client for the pyzhm power-prediction service.
//!
//! The predictor takes a snapshot of current per-label energy consumption
//! plus per-job core requirements and answers with the power label of the
//! energy-optimal placement. It is strictly an optional edge: nothing here
//! is called unless energy-aware placement is enabled.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for predictor calls.
pub type Result<T> = std::result::Result<T, PyzhmError>;

/// Errors that can occur while calling the predictor.
#[derive(Error, Debug)]
pub enum PyzhmError {
    /// Transport-level failure.
    #[error("predictor unreachable: {0}")]
    Http(#[from] reqwest::Error),

    /// The response carried no assignment for a requested job.
    #[error("no assignment for job: {job}")]
    MissingAssignment {
        /// The job id that went unanswered.
        job: String,
    },
}

/// A prediction request: current consumption per power label plus required
/// cores per job id. Both maps must be non-empty when submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Power label → current consumption in watts.
    pub scenario: HashMap<String, f64>,
    /// Job id → required CPU cores.
    pub requirements: HashMap<String, f64>,
}

/// A prediction response: one power label per requested job id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    /// Job id → power label of the chosen placement.
    pub assignments: HashMap<String, String>,
}

impl Predictions {
    /// The assignment for one job id.
    ///
    /// # Errors
    ///
    /// Returns [`PyzhmError::MissingAssignment`] when the job is absent.
    pub fn assignment(&self, job: &str) -> Result<&str> {
        self.assignments
            .get(job)
            .map(String::as_str)
            .ok_or_else(|| PyzhmError::MissingAssignment {
                job: job.to_string(),
            })
    }
}

/// The predictor seam the orchestrator calls through.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Asks the predictor for placements.
    async fn predict(&self, scenario: Scenario) -> Result<Predictions>;
}

/// HTTP client for a pyzhm instance.
#[derive(Debug, Clone)]
pub struct PyzhmClient {
    base_url: String,
    http: reqwest::Client,
}

impl PyzhmClient {
    /// Creates a client for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl Predictor for PyzhmClient {
    async fn predict(&self, scenario: Scenario) -> Result<Predictions> {
        let url = format!("{}/predict", self.base_url);
        let predictions = self
            .http
            .post(&url)
            .json(&scenario)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(predictions)
    }
}

/// Canned predictor for tests: answers every request with a fixed
/// assignment table and records the scenarios it saw.
#[derive(Debug, Default)]
pub struct FixedPredictor {
    assignments: HashMap<String, String>,
    seen: Mutex<Vec<Scenario>>,
}

impl FixedPredictor {
    /// Creates a predictor answering with the given assignments.
    #[must_use]
    pub fn new(assignments: HashMap<String, String>) -> Self {
        Self {
            assignments,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Scenarios received so far.
    #[must_use]
    pub fn seen(&self) -> Vec<Scenario> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Predictor for FixedPredictor {
    async fn predict(&self, scenario: Scenario) -> Result<Predictions> {
        self.seen.lock().push(scenario);
        Ok(Predictions {
            assignments: self.assignments.clone(),
        })
    }
}
