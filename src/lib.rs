pub mod alerts;
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod location;
pub mod occupancy;
pub mod state;
pub mod telemetry;
