use crate::alerts::{AlertChannel, AlertMessage, TOPIC_ADVISORIES};
use crate::api::ApiContext;
use crate::api::responses::{
    ErrorCode, ErrorResponse, GpsUpdateRequest, HealthStatus, HealthSuccessResponse,
    LocationResponse, ManualLocationRequest, PassiveRequest, PassiveResponse, PlaceResponse,
    RadiusRequest, RadiusResponse, SearchQuery, SearchResponse,
};
use crate::engine::Snapshot;
use crate::engine::runtime::EngineHandle;
use crate::error::AppError;
use crate::location::geocode::Place;
use crate::location::{Coordinate, GpsFix, LocationFusion};
use crate::occupancy::Radius;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{error, info, warn};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug)]
enum TimestampError {
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

pub enum ApiResponse<T> {
    Success {
        status: StatusCode,
        body: T,
    },
    Error {
        status: StatusCode,
        body: ErrorResponse,
    },
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success { status, body } => (status, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_snapshot(State(ctx): State<ApiContext>) -> impl IntoResponse {
    build_snapshot_response(&ctx.state, SystemTime::now())
}

pub async fn get_health(State(ctx): State<ApiContext>) -> impl IntoResponse {
    let alerts_connected = ctx.alerts.as_ref().map(|alerts| alerts.is_connected());
    build_health_response(&ctx.state, alerts_connected, SystemTime::now())
}

pub async fn get_location(State(ctx): State<ApiContext>) -> impl IntoResponse {
    build_location_response(&ctx.state, SystemTime::now())
}

pub async fn put_manual_location(
    State(ctx): State<ApiContext>,
    Json(request): Json<ManualLocationRequest>,
) -> impl IntoResponse {
    apply_manual_location(&ctx.engine, &ctx.state, request, SystemTime::now())
}

pub async fn delete_manual_location(State(ctx): State<ApiContext>) -> impl IntoResponse {
    let now = SystemTime::now();
    match ctx.engine.reset_to_gps() {
        Ok(()) => build_location_response(&ctx.state, now),
        Err(err) => app_error_response(err, now),
    }
}

pub async fn post_gps_update(
    State(ctx): State<ApiContext>,
    Json(request): Json<GpsUpdateRequest>,
) -> impl IntoResponse {
    apply_gps_update(&ctx.state, ctx.alerts.as_deref(), request, SystemTime::now())
}

pub async fn search_location(
    State(ctx): State<ApiContext>,
    Query(query): Query<SearchQuery>,
) -> impl IntoResponse {
    let place = ctx.geocoder.search(&query.q).await;
    build_search_response(&ctx.engine, place, SystemTime::now())
}

pub async fn get_place(State(ctx): State<ApiContext>) -> ApiResponse<PlaceResponse> {
    let now = SystemTime::now();
    let coordinate = match current_coordinate(&ctx.state) {
        Ok(Some(coordinate)) => coordinate,
        Ok(None) => {
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorCode::NoData,
                "No location available",
                now,
            );
        }
        Err(err) => return app_error_response(err, now),
    };
    let name = ctx.geocoder.reverse(coordinate).await;
    build_place_response(coordinate, name, now)
}

pub async fn put_radius(
    State(ctx): State<ApiContext>,
    Json(request): Json<RadiusRequest>,
) -> impl IntoResponse {
    apply_radius(&ctx.engine, request, SystemTime::now())
}

pub async fn put_passive(
    State(ctx): State<ApiContext>,
    Json(request): Json<PassiveRequest>,
) -> impl IntoResponse {
    apply_passive(&ctx.engine, request, SystemTime::now())
}

fn build_snapshot_response(state: &Arc<RwLock<AppState>>, now: SystemTime) -> ApiResponse<Snapshot> {
    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return internal_error("state lock poisoned while reading snapshot");
        }
    };
    let snapshot = guard.snapshot().cloned();
    drop(guard);

    match snapshot {
        Some(snapshot) => ApiResponse::Success {
            status: StatusCode::OK,
            body: snapshot,
        },
        None => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::NoData,
            "No snapshot available yet",
            now,
        ),
    }
}

fn build_health_response(
    state: &Arc<RwLock<AppState>>,
    alerts_connected: Option<bool>,
    now: SystemTime,
) -> ApiResponse<HealthSuccessResponse> {
    let location_error = match state.read() {
        Ok(guard) => guard.location().current().error,
        Err(_) => {
            return internal_error("state lock poisoned while reading location");
        }
    };

    let status = if location_error.is_some() || alerts_connected == Some(false) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    };

    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => {
            return internal_error("timestamp formatting failure");
        }
    };

    ApiResponse::Success {
        status: StatusCode::OK,
        body: HealthSuccessResponse {
            status,
            alerts_connected,
            location_error,
            timestamp,
        },
    }
}

fn build_location_response(
    state: &Arc<RwLock<AppState>>,
    now: SystemTime,
) -> ApiResponse<LocationResponse> {
    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => {
            return internal_error("state lock poisoned while reading location");
        }
    };
    location_success(guard.location(), now)
}

fn location_success(fusion: &LocationFusion, now: SystemTime) -> ApiResponse<LocationResponse> {
    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::OK,
            body: LocationResponse {
                location: fusion.current(),
                tracking_enabled: fusion.tracking_enabled(),
                notice: fusion.accuracy_notice().cloned(),
                timestamp,
            },
        },
        Err(_) => internal_error("timestamp formatting failure"),
    }
}

fn apply_manual_location(
    engine: &EngineHandle,
    state: &Arc<RwLock<AppState>>,
    request: ManualLocationRequest,
    now: SystemTime,
) -> ApiResponse<LocationResponse> {
    let coordinate = Coordinate {
        lat: request.lat,
        lng: request.lng,
    };
    match engine.set_manual_location(coordinate) {
        Ok(()) => build_location_response(state, now),
        Err(err) => app_error_response(err, now),
    }
}

/// A newly raised accuracy notice is also published on the advisories
/// topic; repeats while it stays raised are not.
fn apply_gps_update(
    state: &Arc<RwLock<AppState>>,
    alerts: Option<&AlertChannel>,
    request: GpsUpdateRequest,
    now: SystemTime,
) -> ApiResponse<LocationResponse> {
    let raised = {
        let mut guard = match state.write() {
            Ok(guard) => guard,
            Err(_) => {
                return internal_error("state lock poisoned while applying gps update");
            }
        };
        let fusion = guard.location_mut();
        match request {
            GpsUpdateRequest::Fix { lat, lng, accuracy } => {
                let fix = GpsFix {
                    coordinate: Coordinate { lat, lng },
                    accuracy_m: accuracy,
                };
                match fusion.apply_gps_fix(fix) {
                    Ok(raised) => raised,
                    Err(err) => return app_error_response(err, now),
                }
            }
            GpsUpdateRequest::Error { error } => {
                fusion.apply_gps_error(error);
                None
            }
        }
    };

    if let (Some(notice), Some(alerts)) = (raised, alerts)
        && let Err(err) = alerts.publish(TOPIC_ADVISORIES, &AlertMessage::AccuracyNotice(notice))
    {
        warn!(error = %err, "Failed to publish accuracy notice");
    }

    build_location_response(state, now)
}

fn build_search_response(
    engine: &EngineHandle,
    place: Option<Place>,
    now: SystemTime,
) -> ApiResponse<SearchResponse> {
    let Some(place) = place else {
        return error_response(
            StatusCode::NOT_FOUND,
            ErrorCode::NotFound,
            "No place matched the query",
            now,
        );
    };
    if let Err(err) = engine.set_manual_location(place.coordinate) {
        return app_error_response(err, now);
    }
    info!(place = place.short_name(), "Manual location set from search");

    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::OK,
            body: SearchResponse {
                short_name: place.short_name().to_string(),
                display_name: place.display_name,
                coordinate: place.coordinate,
                timestamp,
            },
        },
        Err(_) => internal_error("timestamp formatting failure"),
    }
}

fn build_place_response(
    coordinate: Coordinate,
    name: String,
    now: SystemTime,
) -> ApiResponse<PlaceResponse> {
    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::OK,
            body: PlaceResponse {
                name,
                coordinate,
                timestamp,
            },
        },
        Err(_) => internal_error("timestamp formatting failure"),
    }
}

fn apply_radius(
    engine: &EngineHandle,
    request: RadiusRequest,
    now: SystemTime,
) -> ApiResponse<RadiusResponse> {
    let radius = match Radius::try_from(request.radius) {
        Ok(radius) => radius,
        Err(err) => return app_error_response(err, now),
    };
    if let Err(err) = engine.set_radius(radius) {
        return app_error_response(err, now);
    }
    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::OK,
            body: RadiusResponse { radius, timestamp },
        },
        Err(_) => internal_error("timestamp formatting failure"),
    }
}

fn apply_passive(
    engine: &EngineHandle,
    request: PassiveRequest,
    now: SystemTime,
) -> ApiResponse<PassiveResponse> {
    if let Err(err) = engine.set_passive(request.enabled) {
        return app_error_response(err, now);
    }
    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::OK,
            body: PassiveResponse {
                enabled: request.enabled,
                timestamp,
            },
        },
        Err(_) => internal_error("timestamp formatting failure"),
    }
}

fn current_coordinate(state: &Arc<RwLock<AppState>>) -> Result<Option<Coordinate>, AppError> {
    let guard = state.read().map_err(|_| AppError::StateLock)?;
    Ok(guard.location().current().coordinate)
}

fn app_error_response<T>(err: AppError, now: SystemTime) -> ApiResponse<T> {
    let (status, code) = match err {
        AppError::InvalidRadius(_) => (StatusCode::BAD_REQUEST, ErrorCode::InvalidRadius),
        AppError::InvalidCoordinate { .. } => {
            (StatusCode::BAD_REQUEST, ErrorCode::InvalidCoordinate)
        }
        AppError::EngineStopped => (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::EngineStopped),
        _ => return internal_error(&err.to_string()),
    };
    error_response(status, code, &err.to_string(), now)
}

fn error_response<T>(
    status: StatusCode,
    error_code: ErrorCode,
    message: &str,
    now: SystemTime,
) -> ApiResponse<T> {
    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Error {
            status,
            body: ErrorResponse {
                error_code,
                error_message: message.to_string(),
                timestamp,
            },
        },
        Err(_) => internal_error("timestamp formatting failure"),
    }
}

fn internal_error<T>(message: &str) -> ApiResponse<T> {
    error!(message = message, "Internal error while handling request");
    let formatted = format_timestamp(SystemTime::now()).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format internal error timestamp");
        OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
    });
    ApiResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorResponse {
            error_code: ErrorCode::InternalError,
            error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            timestamp: formatted,
        },
    }
}

fn format_timestamp(timestamp: SystemTime) -> Result<String, TimestampError> {
    let datetime = OffsetDateTime::from(timestamp);
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertChannelConfig;
    use crate::alerts::memory::{MemoryBroker, MemoryTransport};
    use crate::engine::runtime::spawn_engine;
    use crate::engine::{Engine, EngineConfig};
    use crate::location::{LocationErrorKind, LocationSource};
    use crate::occupancy::scripted::ScriptedSource;
    use std::time::{Duration, UNIX_EPOCH};

    fn expect_success<T>(response: ApiResponse<T>) -> T {
        match response {
            ApiResponse::Success { body, .. } => body,
            ApiResponse::Error { status, body } => {
                panic!("expected success, got {status}: {:?}", body.error_code)
            }
        }
    }

    fn expect_error<T>(response: ApiResponse<T>) -> (StatusCode, ErrorResponse) {
        match response {
            ApiResponse::Error { status, body } => (status, body),
            ApiResponse::Success { status, .. } => panic!("expected error, got {status}"),
        }
    }

    fn poisoned_state() -> Arc<RwLock<AppState>> {
        let state = Arc::new(RwLock::new(AppState::default()));
        let state_for_thread = Arc::clone(&state);
        let _ = std::thread::spawn(move || {
            let _guard = state_for_thread.write().expect("lock for poison");
            panic!("poison lock");
        })
        .join();
        state
    }

    fn idle_engine(state: &Arc<RwLock<AppState>>) -> EngineHandle {
        let config = EngineConfig {
            tick_interval: Duration::from_secs(3600),
            ..EngineConfig::default()
        };
        let (handle, _task) = spawn_engine(
            &config,
            ScriptedSource::new(vec![10]),
            Arc::clone(state),
            None,
        );
        handle
    }

    #[test]
    fn snapshot_returns_no_data_before_first_tick() {
        let state = Arc::new(RwLock::new(AppState::default()));

        let (status, body) =
            expect_error(build_snapshot_response(&state, UNIX_EPOCH + Duration::from_secs(1)));

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.error_code, ErrorCode::NoData);
        assert_eq!(body.timestamp, "1970-01-01T00:00:01Z");
    }

    #[test]
    fn snapshot_returns_latest_engine_output() {
        let mut app_state = AppState::default();
        let snapshot = Engine::default()
            .tick(OffsetDateTime::UNIX_EPOCH, 40, None)
            .snapshot;
        app_state.set_snapshot(snapshot.clone());
        let state = Arc::new(RwLock::new(app_state));

        let body = expect_success(build_snapshot_response(&state, SystemTime::now()));

        assert_eq!(body, snapshot);
    }

    #[test]
    fn snapshot_returns_internal_error_when_lock_poisoned() {
        let state = poisoned_state();

        let (status, body) = expect_error(build_snapshot_response(&state, SystemTime::now()));

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error_code, ErrorCode::InternalError);
        assert_eq!(body.error_message, "Internal server error");
    }

    #[test]
    fn health_is_ok_without_location_error_or_alert_outage() {
        let state = Arc::new(RwLock::new(AppState::default()));

        let body = expect_success(build_health_response(
            &state,
            Some(true),
            UNIX_EPOCH + Duration::from_secs(2),
        ));

        assert_eq!(body.status, HealthStatus::Ok);
        assert_eq!(body.timestamp, "1970-01-01T00:00:02Z");
    }

    #[test]
    fn health_is_degraded_on_location_error() {
        let state = Arc::new(RwLock::new(AppState::default()));
        state
            .write()
            .expect("lock")
            .location_mut()
            .apply_gps_error(LocationErrorKind::PermissionDenied);

        let body = expect_success(build_health_response(&state, None, SystemTime::now()));

        assert_eq!(body.status, HealthStatus::Degraded);
        assert_eq!(body.location_error, Some(LocationErrorKind::PermissionDenied));
    }

    #[test]
    fn health_is_degraded_when_alerts_disconnected() {
        let state = Arc::new(RwLock::new(AppState::default()));

        let body = expect_success(build_health_response(&state, Some(false), SystemTime::now()));

        assert_eq!(body.status, HealthStatus::Degraded);
    }

    #[test]
    fn gps_fix_with_poor_accuracy_carries_notice() {
        let state = Arc::new(RwLock::new(AppState::default()));

        let body = expect_success(apply_gps_update(
            &state,
            None,
            GpsUpdateRequest::Fix {
                lat: 51.5074,
                lng: -0.1278,
                accuracy: 2500.0,
            },
            SystemTime::now(),
        ));

        assert_eq!(body.location.source, LocationSource::Gps);
        assert_eq!(body.location.accuracy_m, Some(2500.0));
        assert!(
            body.notice
                .map(|n| n.message.starts_with("Precise location unavailable (Accuracy: 2.5km)"))
                .unwrap_or(false)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn raised_accuracy_notice_is_published_once() {
        let broker = MemoryBroker::new();
        let alerts = AlertChannel::new(
            MemoryTransport::new(broker.clone()),
            AlertChannelConfig::default(),
        );
        let listener = AlertChannel::new(
            MemoryTransport::new(broker.clone()),
            AlertChannelConfig::default(),
        );
        alerts.connect();
        listener.connect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut advisories = listener.subscribe(TOPIC_ADVISORIES);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let state = Arc::new(RwLock::new(AppState::default()));
        let poor_fix = || GpsUpdateRequest::Fix {
            lat: 51.5074,
            lng: -0.1278,
            accuracy: 2500.0,
        };

        expect_success(apply_gps_update(&state, Some(&alerts), poor_fix(), SystemTime::now()));
        expect_success(apply_gps_update(&state, Some(&alerts), poor_fix(), SystemTime::now()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let Ok(AlertMessage::AccuracyNotice(notice)) = advisories.try_recv() else {
            panic!("expected accuracy notice");
        };
        assert_eq!(notice.accuracy_m, 2500.0);
        assert!(advisories.try_recv().is_err());
    }

    #[test]
    fn gps_fix_out_of_range_is_rejected() {
        let state = Arc::new(RwLock::new(AppState::default()));

        let (status, body) = expect_error(apply_gps_update(
            &state,
            None,
            GpsUpdateRequest::Fix {
                lat: 91.0,
                lng: 0.0,
                accuracy: 10.0,
            },
            SystemTime::now(),
        ));

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error_code, ErrorCode::InvalidCoordinate);
    }

    #[tokio::test]
    async fn manual_location_overrides_gps() {
        let state = Arc::new(RwLock::new(AppState::default()));
        let engine = idle_engine(&state);
        expect_success(apply_gps_update(
            &state,
            None,
            GpsUpdateRequest::Fix {
                lat: 51.5074,
                lng: -0.1278,
                accuracy: 50.0,
            },
            SystemTime::now(),
        ));

        let body = expect_success(apply_manual_location(
            &engine,
            &state,
            ManualLocationRequest {
                lat: 51.5,
                lng: -0.12,
            },
            SystemTime::now(),
        ));

        assert_eq!(body.location.source, LocationSource::Manual);
        assert_eq!(
            body.location.coordinate,
            Some(Coordinate {
                lat: 51.5,
                lng: -0.12
            })
        );
        assert_eq!(body.location.accuracy_m, Some(0.0));
    }

    #[tokio::test]
    async fn radius_outside_allowed_values_is_rejected() {
        let state = Arc::new(RwLock::new(AppState::default()));
        let engine = idle_engine(&state);

        let (status, body) =
            expect_error(apply_radius(&engine, RadiusRequest { radius: 75 }, SystemTime::now()));

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error_code, ErrorCode::InvalidRadius);
    }

    #[tokio::test]
    async fn radius_is_forwarded_to_engine() {
        let state = Arc::new(RwLock::new(AppState::default()));
        let engine = idle_engine(&state);

        let body =
            expect_success(apply_radius(&engine, RadiusRequest { radius: 100 }, SystemTime::now()));

        assert_eq!(body.radius, Radius::Wide);
    }

    #[tokio::test]
    async fn commands_after_stop_report_engine_stopped() {
        let state = Arc::new(RwLock::new(AppState::default()));
        let config = EngineConfig::default();
        let (engine, task) = spawn_engine(&config, ScriptedSource::new(vec![10]), Arc::clone(&state), None);
        engine.stop();
        task.await.expect("actor exits");

        let (status, body) = expect_error(apply_passive(
            &engine,
            PassiveRequest { enabled: true },
            SystemTime::now(),
        ));

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.error_code, ErrorCode::EngineStopped);
    }

    #[tokio::test]
    async fn search_hit_sets_manual_location() {
        let state = Arc::new(RwLock::new(AppState::default()));
        let engine = idle_engine(&state);
        let place = Place {
            coordinate: Coordinate {
                lat: 51.508,
                lng: -0.128,
            },
            display_name: "Trafalgar Square, London, UK".to_string(),
        };

        let body = expect_success(build_search_response(&engine, Some(place), SystemTime::now()));

        assert_eq!(body.short_name, "Trafalgar Square");
        let location = state.read().expect("lock").location().current();
        assert_eq!(location.source, LocationSource::Manual);
        assert_eq!(location.coordinate, Some(body.coordinate));
    }

    #[tokio::test]
    async fn search_miss_returns_not_found() {
        let state = Arc::new(RwLock::new(AppState::default()));
        let engine = idle_engine(&state);

        let (status, body) = expect_error(build_search_response(&engine, None, SystemTime::now()));

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.error_code, ErrorCode::NotFound);
        assert!(!state.read().expect("lock").location().is_manual());
    }

    #[test]
    fn place_response_carries_name_and_coordinate() {
        let coordinate = Coordinate {
            lat: 51.5,
            lng: -0.12,
        };

        let body = expect_success(build_place_response(
            coordinate,
            "London".to_string(),
            UNIX_EPOCH,
        ));

        assert_eq!(body.name, "London");
        assert_eq!(body.coordinate, coordinate);
        assert_eq!(body.timestamp, "1970-01-01T00:00:00Z");
    }
}
