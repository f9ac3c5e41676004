//! Per-tick crowd telemetry: density classification and the derived signals
//! computed from recent samples.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod advisory;
pub mod cooldown;
pub mod history;
pub mod spike;
pub mod trend;

pub const DEFAULT_MEDIUM_ABOVE: u32 = 15;
pub const DEFAULT_HEAVY_ABOVE: u32 = 35;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DensityLevel {
    Low,
    Medium,
    Heavy,
}

/// Count thresholds separating the density levels. Both bounds are
/// exclusive: a count equal to `heavy_above` is still Medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DensityThresholds {
    pub medium_above: u32,
    pub heavy_above: u32,
}

impl DensityThresholds {
    pub fn classify(&self, count: u32) -> DensityLevel {
        if count > self.heavy_above {
            DensityLevel::Heavy
        } else if count > self.medium_above {
            DensityLevel::Medium
        } else {
            DensityLevel::Low
        }
    }
}

impl Default for DensityThresholds {
    fn default() -> Self {
        Self {
            medium_above: DEFAULT_MEDIUM_ABOVE,
            heavy_above: DEFAULT_HEAVY_ABOVE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub count: u32,
    pub density: DensityLevel,
}
