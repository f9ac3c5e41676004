use crate::location::{AccuracyNotice, Coordinate, LocationErrorKind, LocationState};
use crate::occupancy::Radius;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorResponse {
    pub error_code: ErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoData,
    NotFound,
    InvalidRadius,
    InvalidCoordinate,
    EngineStopped,
    InternalError,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alerts_connected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_error: Option<LocationErrorKind>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct LocationResponse {
    #[serde(flatten)]
    pub location: LocationState,
    pub tracking_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<AccuracyNotice>,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct ManualLocationRequest {
    pub lat: f64,
    pub lng: f64,
}

/// One event from the client's position stream: a fix or an error.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum GpsUpdateRequest {
    Fix { lat: f64, lng: f64, accuracy: f64 },
    Error { error: LocationErrorKind },
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub display_name: String,
    pub short_name: String,
    pub coordinate: Coordinate,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct PlaceResponse {
    pub name: String,
    pub coordinate: Coordinate,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct RadiusRequest {
    pub radius: u16,
}

#[derive(Debug, Serialize)]
pub struct RadiusResponse {
    pub radius: Radius,
    pub timestamp: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PassiveRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct PassiveResponse {
    pub enabled: bool,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationSource;
    use serde_json::json;

    #[test]
    fn error_response_uses_screaming_snake_case_code() {
        let response = ErrorResponse {
            error_code: ErrorCode::InvalidRadius,
            error_message: "invalid radius: 75m (expected 25, 50 or 100)".to_string(),
            timestamp: "2026-01-11T12:32:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize error response");
        assert_eq!(
            value,
            json!({
                "error_code": "INVALID_RADIUS",
                "error_message": "invalid radius: 75m (expected 25, 50 or 100)",
                "timestamp": "2026-01-11T12:32:00Z"
            })
        );
    }

    #[test]
    fn health_response_omits_unknown_fields() {
        let response = HealthSuccessResponse {
            status: HealthStatus::Ok,
            alerts_connected: None,
            location_error: None,
            timestamp: "2026-01-11T12:33:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize health response");
        assert_eq!(
            value,
            json!({
                "status": "ok",
                "timestamp": "2026-01-11T12:33:00Z"
            })
        );
    }

    #[test]
    fn location_response_flattens_state() {
        let response = LocationResponse {
            location: LocationState {
                coordinate: Some(Coordinate {
                    lat: 51.5,
                    lng: -0.12,
                }),
                accuracy_m: Some(0.0),
                source: LocationSource::Manual,
                error: None,
            },
            tracking_enabled: true,
            notice: None,
            timestamp: "2026-01-11T12:34:00Z".to_string(),
        };

        let value = serde_json::to_value(response).expect("serialize location response");
        assert_eq!(
            value,
            json!({
                "coordinate": { "lat": 51.5, "lng": -0.12 },
                "accuracy_m": 0.0,
                "source": "manual",
                "tracking_enabled": true,
                "timestamp": "2026-01-11T12:34:00Z"
            })
        );
    }

    #[test]
    fn gps_update_accepts_fix_or_error() {
        let fix: GpsUpdateRequest =
            serde_json::from_value(json!({ "lat": 51.5, "lng": -0.12, "accuracy": 30.0 }))
                .expect("fix");
        let error: GpsUpdateRequest =
            serde_json::from_value(json!({ "error": "permission_denied" })).expect("error");

        assert!(matches!(fix, GpsUpdateRequest::Fix { accuracy, .. } if accuracy == 30.0));
        assert!(matches!(
            error,
            GpsUpdateRequest::Error {
                error: LocationErrorKind::PermissionDenied
            }
        ));
    }
}
