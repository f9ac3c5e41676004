//! Location fusion: one authoritative coordinate from a GPS stream and an
//! optional manual override.
//!
//! A manual coordinate always wins over GPS and masks GPS errors. GPS fixes
//! keep arriving while an override is active but only become authoritative
//! again after [`LocationFusion::reset_to_gps`].

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub mod geocode;

pub const DEFAULT_DEGRADED_ACCURACY_M: f64 = 2000.0;

/// Earth radius used for great-circle distances, in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Result<Self, AppError> {
        let coordinate = Self { lat, lng };
        if coordinate.is_valid() {
            Ok(coordinate)
        } else {
            Err(AppError::InvalidCoordinate { lat, lng })
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Shift by a fixed number of degrees on both axes. Latitude is clamped
    /// at the poles and longitude wraps across the antimeridian.
    pub fn offset(&self, degrees: f64) -> Self {
        let mut lng = self.lng + degrees;
        if lng > 180.0 {
            lng -= 360.0;
        } else if lng < -180.0 {
            lng += 360.0;
        }
        Self {
            lat: (self.lat + degrees).clamp(-90.0, 90.0),
            lng,
        }
    }

    /// Haversine distance in meters.
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }

    /// Display form used when no place name can be resolved.
    pub fn display(&self) -> String {
        format!("{:.4}, {:.4}", self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    Gps,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationErrorKind {
    PermissionDenied,
    Timeout,
    Unsupported,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub coordinate: Coordinate,
    pub accuracy_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationState {
    pub coordinate: Option<Coordinate>,
    pub accuracy_m: Option<f64>,
    pub source: LocationSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<LocationErrorKind>,
}

/// Raised while GPS accuracy is worse than the configured threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyNotice {
    pub accuracy_m: f64,
    pub message: String,
}

impl AccuracyNotice {
    fn new(accuracy_m: f64) -> Self {
        Self {
            accuracy_m,
            message: format!(
                "Precise location unavailable (Accuracy: {:.1}km). Using approximate network location.",
                accuracy_m / 1000.0
            ),
        }
    }
}

#[derive(Debug)]
pub struct LocationFusion {
    gps: Option<GpsFix>,
    gps_error: Option<LocationErrorKind>,
    manual: Option<Coordinate>,
    tracking_enabled: bool,
    degraded_accuracy_m: f64,
    accuracy_notice: Option<AccuracyNotice>,
}

impl LocationFusion {
    pub fn new(degraded_accuracy_m: f64) -> Self {
        Self {
            gps: None,
            gps_error: None,
            manual: None,
            tracking_enabled: true,
            degraded_accuracy_m,
            accuracy_notice: None,
        }
    }

    /// Apply a fix from the GPS stream. Returns a notice only when the
    /// degraded-accuracy condition is newly raised by this fix.
    pub fn apply_gps_fix(&mut self, fix: GpsFix) -> Result<Option<AccuracyNotice>, AppError> {
        if !fix.coordinate.is_valid() {
            return Err(AppError::InvalidCoordinate {
                lat: fix.coordinate.lat,
                lng: fix.coordinate.lng,
            });
        }
        if !self.tracking_enabled {
            debug!("Ignoring GPS fix while tracking is disabled");
            return Ok(None);
        }
        self.gps = Some(fix);
        self.gps_error = None;
        Ok(self.refresh_accuracy_notice())
    }

    pub fn apply_gps_error(&mut self, kind: LocationErrorKind) {
        if self.manual.is_none() {
            warn!(error = ?kind, "GPS location error");
        }
        self.gps_error = Some(kind);
    }

    pub fn set_manual(&mut self, coordinate: Coordinate) -> Result<(), AppError> {
        if !coordinate.is_valid() {
            return Err(AppError::InvalidCoordinate {
                lat: coordinate.lat,
                lng: coordinate.lng,
            });
        }
        info!(lat = coordinate.lat, lng = coordinate.lng, "Manual location set");
        self.manual = Some(coordinate);
        self.refresh_accuracy_notice();
        Ok(())
    }

    pub fn reset_to_gps(&mut self) {
        info!("Manual location cleared, reverting to GPS");
        self.manual = None;
        self.tracking_enabled = true;
        self.refresh_accuracy_notice();
    }

    pub fn set_tracking_enabled(&mut self, enabled: bool) {
        self.tracking_enabled = enabled;
        self.refresh_accuracy_notice();
    }

    pub fn tracking_enabled(&self) -> bool {
        self.tracking_enabled
    }

    pub fn is_manual(&self) -> bool {
        self.manual.is_some()
    }

    pub fn current(&self) -> LocationState {
        match self.manual {
            Some(coordinate) => LocationState {
                coordinate: Some(coordinate),
                accuracy_m: Some(0.0),
                source: LocationSource::Manual,
                error: None,
            },
            None => LocationState {
                coordinate: self.gps.map(|fix| fix.coordinate),
                accuracy_m: self.gps.map(|fix| fix.accuracy_m),
                source: LocationSource::Gps,
                error: self.gps_error,
            },
        }
    }

    pub fn accuracy_notice(&self) -> Option<&AccuracyNotice> {
        self.accuracy_notice.as_ref()
    }

    fn refresh_accuracy_notice(&mut self) -> Option<AccuracyNotice> {
        let degraded = self
            .gps
            .filter(|fix| fix.accuracy_m > self.degraded_accuracy_m)
            .filter(|_| self.tracking_enabled && self.manual.is_none());

        match (degraded, self.accuracy_notice.is_some()) {
            (Some(fix), false) => {
                let notice = AccuracyNotice::new(fix.accuracy_m);
                warn!(accuracy_m = fix.accuracy_m, "Degraded location accuracy");
                self.accuracy_notice = Some(notice.clone());
                Some(notice)
            }
            (None, true) => {
                info!("Location accuracy recovered");
                self.accuracy_notice = None;
                None
            }
            _ => None,
        }
    }
}

impl Default for LocationFusion {
    fn default() -> Self {
        Self::new(DEFAULT_DEGRADED_ACCURACY_M)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(lat: f64, lng: f64, accuracy_m: f64) -> GpsFix {
        GpsFix {
            coordinate: Coordinate { lat, lng },
            accuracy_m,
        }
    }

    #[test]
    fn manual_location_wins_over_gps() -> Result<(), AppError> {
        let mut fusion = LocationFusion::default();
        fusion.apply_gps_fix(fix(51.5074, -0.1278, 50.0))?;
        fusion.set_manual(Coordinate::new(51.5, -0.12)?)?;

        let state = fusion.current();

        assert_eq!(state.coordinate, Some(Coordinate { lat: 51.5, lng: -0.12 }));
        assert_eq!(state.accuracy_m, Some(0.0));
        assert_eq!(state.source, LocationSource::Manual);
        Ok(())
    }

    #[test]
    fn reset_to_gps_reverts_to_latest_fix() -> Result<(), AppError> {
        let mut fusion = LocationFusion::default();
        fusion.set_manual(Coordinate::new(10.0, 10.0)?)?;
        fusion.set_tracking_enabled(false);
        fusion.reset_to_gps();
        fusion.apply_gps_fix(fix(51.5074, -0.1278, 50.0))?;

        let state = fusion.current();

        assert!(fusion.tracking_enabled());
        assert_eq!(state.source, LocationSource::Gps);
        assert_eq!(state.accuracy_m, Some(50.0));
        assert_eq!(
            state.coordinate,
            Some(Coordinate {
                lat: 51.5074,
                lng: -0.1278
            })
        );
        Ok(())
    }

    #[test]
    fn manual_override_masks_gps_errors() -> Result<(), AppError> {
        let mut fusion = LocationFusion::default();
        fusion.apply_gps_error(LocationErrorKind::PermissionDenied);
        assert_eq!(fusion.current().error, Some(LocationErrorKind::PermissionDenied));

        fusion.set_manual(Coordinate::new(1.0, 2.0)?)?;
        assert_eq!(fusion.current().error, None);

        fusion.reset_to_gps();
        assert_eq!(fusion.current().error, Some(LocationErrorKind::PermissionDenied));
        Ok(())
    }

    #[test]
    fn fixes_are_ignored_while_tracking_disabled() -> Result<(), AppError> {
        let mut fusion = LocationFusion::default();
        fusion.set_tracking_enabled(false);

        fusion.apply_gps_fix(fix(1.0, 1.0, 10.0))?;

        assert_eq!(fusion.current().coordinate, None);
        Ok(())
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let mut fusion = LocationFusion::default();

        assert!(matches!(
            fusion.set_manual(Coordinate { lat: 91.0, lng: 0.0 }),
            Err(AppError::InvalidCoordinate { .. })
        ));
        assert!(Coordinate::new(0.0, -180.5).is_err());
        assert!(Coordinate::new(-90.0, 180.0).is_ok());
    }

    #[test]
    fn degraded_accuracy_is_raised_once_until_cleared() -> Result<(), AppError> {
        let mut fusion = LocationFusion::default();

        let first = fusion.apply_gps_fix(fix(1.0, 1.0, 2500.0))?;
        let second = fusion.apply_gps_fix(fix(1.0, 1.0, 3000.0))?;

        let notice = first.expect("notice raised on first degraded fix");
        assert!(notice.message.contains("2.5km"));
        assert!(second.is_none());
        assert!(fusion.accuracy_notice().is_some());

        fusion.apply_gps_fix(fix(1.0, 1.0, 30.0))?;
        assert!(fusion.accuracy_notice().is_none());

        let recurred = fusion.apply_gps_fix(fix(1.0, 1.0, 2100.0))?;
        assert!(recurred.is_some());
        Ok(())
    }

    #[test]
    fn degraded_accuracy_is_not_raised_under_manual_override() -> Result<(), AppError> {
        let mut fusion = LocationFusion::default();
        fusion.set_manual(Coordinate::new(1.0, 1.0)?)?;

        let notice = fusion.apply_gps_fix(fix(1.0, 1.0, 5000.0))?;

        assert!(notice.is_none());
        assert!(fusion.accuracy_notice().is_none());
        Ok(())
    }

    #[test]
    fn accuracy_exactly_at_threshold_is_not_degraded() -> Result<(), AppError> {
        let mut fusion = LocationFusion::default();

        let notice = fusion.apply_gps_fix(fix(1.0, 1.0, 2000.0))?;

        assert!(notice.is_none());
        Ok(())
    }

    #[test]
    fn offset_stays_in_range_near_the_pole_and_antimeridian() {
        let shifted = Coordinate {
            lat: 89.999,
            lng: 179.999,
        }
        .offset(0.0015);

        assert_eq!(shifted.lat, 90.0);
        assert!((shifted.lng - (-179.9995)).abs() < 1e-9);
        assert!(shifted.is_valid());
    }

    #[test]
    fn haversine_distance_matches_known_offset() {
        let origin = Coordinate { lat: 0.0, lng: 0.0 };
        let north = Coordinate { lat: 0.001, lng: 0.0 };

        let distance = origin.distance_m(&north);

        assert!((distance - 111.19).abs() < 0.1, "distance was {distance}");
    }

    #[test]
    fn display_uses_four_decimals() {
        let coordinate = Coordinate {
            lat: 51.507351,
            lng: -0.127758,
        };

        assert_eq!(coordinate.display(), "51.5074, -0.1278");
    }
}
