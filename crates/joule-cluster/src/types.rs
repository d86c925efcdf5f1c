//! Read-side views of cluster objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quantity::CpuQuantity;

/// Lifecycle phase of a pod, as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    /// Accepted but not yet scheduled or started.
    Pending,
    /// At least one container is running.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// At least one container terminated in failure.
    Failed,
    /// Phase could not be determined.
    Unknown,
}

impl PodPhase {
    /// Whether the pod has finished for good.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl From<&str> for PodPhase {
    fn from(raw: &str) -> Self {
        match raw {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// The slice of a pod the control loops care about.
#[derive(Debug, Clone, PartialEq)]
pub struct PodView {
    /// Pod name, unique within the namespace.
    pub name: String,
    /// Node the pod is bound to, if scheduled.
    pub node_name: Option<String>,
    /// Current phase.
    pub phase: PodPhase,
    /// Creation timestamp.
    pub created_at: Option<DateTime<Utc>>,
    /// When the pod started on its node.
    pub started_at: Option<DateTime<Utc>>,
    /// CPU limit of the first container, when set.
    pub cpu_limit: Option<CpuQuantity>,
    /// Declared minimum CPU floor in percent, from the pod annotation.
    pub min_cpu_percent: Option<f64>,
}

/// The slice of a batch job the release loop cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct JobView {
    /// Job name.
    pub name: String,
    /// Whether the job is currently suspended.
    pub suspended: bool,
    /// Scheduled release time, from the start-after annotation.
    pub start_after: Option<DateTime<Utc>>,
    /// Number of succeeded pods.
    pub succeeded: i32,
    /// Number of actively running pods.
    pub active: i32,
    /// Creation timestamp.
    pub created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_from_str() {
        assert_eq!(PodPhase::from("Running"), PodPhase::Running);
        assert_eq!(PodPhase::from("Succeeded"), PodPhase::Succeeded);
        assert_eq!(PodPhase::from("weird"), PodPhase::Unknown);
    }

    #[test]
    fn terminal_phases() {
        assert!(PodPhase::Succeeded.is_terminal());
        assert!(PodPhase::Failed.is_terminal());
        assert!(!PodPhase::Running.is_terminal());
        assert!(!PodPhase::Pending.is_terminal());
    }
}
