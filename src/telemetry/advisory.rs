//! Advisories derived from the current density: an estimated wait and a
//! nearby coordinate to move towards. Both only exist while density is Heavy
//! and are recomputed from scratch every tick.

use crate::location::Coordinate;
use crate::telemetry::DensityLevel;
use serde::{Deserialize, Serialize};

pub const DEFAULT_WAIT_FLOOR_MINUTES: u32 = 5;
pub const DEFAULT_WAIT_DIVISOR: u32 = 4;
/// Roughly 150 m north-east at mid latitudes.
pub const DEFAULT_SAFE_ZONE_OFFSET_DEG: f64 = 0.0015;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Advisory {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_time_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safe_zone: Option<Coordinate>,
}

#[derive(Debug, Clone, Copy)]
pub struct WaitTimeEstimator {
    floor_minutes: u32,
    divisor: u32,
}

impl WaitTimeEstimator {
    pub fn new(floor_minutes: u32, divisor: u32) -> Self {
        Self {
            floor_minutes,
            divisor: divisor.max(1),
        }
    }

    pub fn estimate(&self, density: DensityLevel, count: u32) -> Option<u32> {
        match density {
            DensityLevel::Heavy => Some((count / self.divisor).max(self.floor_minutes)),
            DensityLevel::Low | DensityLevel::Medium => None,
        }
    }
}

impl Default for WaitTimeEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT_FLOOR_MINUTES, DEFAULT_WAIT_DIVISOR)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SafeZoneRecommender {
    offset_deg: f64,
}

impl SafeZoneRecommender {
    pub fn new(offset_deg: f64) -> Self {
        Self { offset_deg }
    }

    pub fn recommend(
        &self,
        density: DensityLevel,
        location: Option<Coordinate>,
    ) -> Option<Coordinate> {
        match (density, location) {
            (DensityLevel::Heavy, Some(coordinate)) => Some(coordinate.offset(self.offset_deg)),
            _ => None,
        }
    }
}

impl Default for SafeZoneRecommender {
    fn default() -> Self {
        Self::new(DEFAULT_SAFE_ZONE_OFFSET_DEG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_time_only_for_heavy() {
        let estimator = WaitTimeEstimator::default();

        assert_eq!(estimator.estimate(DensityLevel::Heavy, 50), Some(12));
        assert_eq!(estimator.estimate(DensityLevel::Heavy, 16), Some(5));
        assert_eq!(estimator.estimate(DensityLevel::Heavy, 129), Some(32));
        assert_eq!(estimator.estimate(DensityLevel::Medium, 30), None);
        assert_eq!(estimator.estimate(DensityLevel::Low, 0), None);
    }

    #[test]
    fn safe_zone_requires_heavy_and_location() {
        let recommender = SafeZoneRecommender::default();
        let here = Coordinate {
            lat: 51.5,
            lng: -0.12,
        };

        let zone = recommender
            .recommend(DensityLevel::Heavy, Some(here))
            .expect("safe zone");

        assert_eq!(zone.lat, 51.5 + 0.0015);
        assert_eq!(zone.lng, -0.12 + 0.0015);
        assert!(recommender.recommend(DensityLevel::Heavy, None).is_none());
        assert!(recommender.recommend(DensityLevel::Medium, Some(here)).is_none());
    }

    #[test]
    fn empty_advisory_omits_fields() {
        let value = serde_json::to_value(Advisory::default()).expect("serialize advisory");

        assert_eq!(value, serde_json::json!({}));
    }
}
