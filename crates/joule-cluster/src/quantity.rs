//! CPU resource quantities in millicores.
//!
//! Mirrors the decimal subset of Kubernetes quantity syntax the stress jobs
//! actually use (`250m`, `1`, `1.5`). Percent conversions go through a
//! node's core count and are exact inverses within one millicore.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ClusterError;

/// A non-negative CPU quantity, stored as millicores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CpuQuantity {
    millis: i64,
}

impl CpuQuantity {
    /// Creates a quantity from millicores, clamping negatives to zero.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self {
            millis: millis.max(0),
        }
    }

    /// Millicore value.
    #[must_use]
    pub const fn millis(&self) -> i64 {
        self.millis
    }

    /// Whole-core value, rounded up. Used for predictor requirements.
    #[must_use]
    pub const fn cores_ceil(&self) -> i64 {
        (self.millis + 999) / 1000
    }

    /// Converts a utilization percentage of a node into a quantity, given
    /// the node's core count.
    #[must_use]
    pub fn from_percentage(percent: f64, cores: u32) -> Self {
        let millis = (percent / 100.0) * f64::from(cores) * 1000.0;
        #[allow(clippy::cast_possible_truncation)] // rounded and clamped below
        let millis = millis.round() as i64;
        Self::from_millis(millis)
    }

    /// Converts the quantity back into a utilization percentage of a node.
    #[must_use]
    pub fn to_percentage(&self, cores: u32) -> f64 {
        #[allow(clippy::cast_precision_loss)] // millicores are far below 2^52
        let cores = f64::from(cores.max(1));
        (self.millis as f64 / 1000.0) / cores * 100.0
    }

    /// A quarter of the quantity. Stress jobs request ¼ of their limit.
    #[must_use]
    pub const fn quarter(&self) -> Self {
        Self {
            millis: self.millis / 4,
        }
    }

    /// Adds a signed millicore delta, clamping at zero.
    #[must_use]
    pub fn saturating_add_millis(&self, delta: i64) -> Self {
        Self::from_millis(self.millis.saturating_add(delta))
    }
}

impl fmt::Display for CpuQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis % 1000 == 0 {
            write!(f, "{}", self.millis / 1000)
        } else {
            write!(f, "{}m", self.millis)
        }
    }
}

impl FromStr for CpuQuantity {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ClusterError::InvalidQuantity { raw: s.to_string() };

        if let Some(millis) = s.strip_suffix('m') {
            let millis: i64 = millis.parse().map_err(|_| invalid())?;
            if millis < 0 {
                return Err(invalid());
            }
            return Ok(Self { millis });
        }
        let cores: f64 = s.parse().map_err(|_| invalid())?;
        if !cores.is_finite() || cores < 0.0 {
            return Err(invalid());
        }
        #[allow(clippy::cast_possible_truncation)]
        let millis = (cores * 1000.0).round() as i64;
        Ok(Self { millis })
    }
}

impl Serialize for CpuQuantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CpuQuantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}
