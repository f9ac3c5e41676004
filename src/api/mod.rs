use crate::alerts::AlertChannel;
use crate::engine::runtime::EngineHandle;
use crate::location::geocode::Geocoder;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post, put};
use std::sync::{Arc, RwLock};

pub mod handlers;
pub mod responses;

/// Everything a handler can reach.
#[derive(Debug, Clone)]
pub struct ApiContext {
    pub state: Arc<RwLock<AppState>>,
    pub engine: EngineHandle,
    pub geocoder: Arc<Geocoder>,
    pub alerts: Option<Arc<AlertChannel>>,
}

pub fn router(context: ApiContext) -> Router {
    Router::new()
        .route("/api/snapshot", get(handlers::get_snapshot))
        .route("/api/health", get(handlers::get_health))
        .route("/api/location", get(handlers::get_location))
        .route(
            "/api/location/manual",
            put(handlers::put_manual_location).delete(handlers::delete_manual_location),
        )
        .route("/api/location/gps", post(handlers::post_gps_update))
        .route("/api/location/search", get(handlers::search_location))
        .route("/api/location/place", get(handlers::get_place))
        .route("/api/radius", put(handlers::put_radius))
        .route("/api/passive", put(handlers::put_passive))
        .with_state(context)
}
