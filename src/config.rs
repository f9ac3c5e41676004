use crate::alerts::{
    AlertChannelConfig, DEFAULT_HEARTBEAT, DEFAULT_RECONNECT_DELAY, DEFAULT_SUBSCRIBE_RETRY,
};
use crate::engine::{DEFAULT_FALLBACK_LOCATION, DEFAULT_INITIAL_COUNT, EngineConfig};
use crate::location::geocode::{
    DEFAULT_REVERSE_URL, DEFAULT_SEARCH_URL, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT,
};
use crate::location::{Coordinate, DEFAULT_DEGRADED_ACCURACY_M};
use crate::occupancy::Radius;
use crate::occupancy::peers::DEFAULT_ACTIVE_WINDOW;
use crate::telemetry::DensityThresholds;
use crate::telemetry::advisory::{
    DEFAULT_SAFE_ZONE_OFFSET_DEG, DEFAULT_WAIT_DIVISOR, DEFAULT_WAIT_FLOOR_MINUTES,
};
use crate::telemetry::cooldown::{DEFAULT_COOLDOWN_SECS, DEFAULT_COOLDOWN_STEP_SECS};
use crate::telemetry::history::DEFAULT_HISTORY_CAPACITY;
use crate::telemetry::spike::DEFAULT_SPIKE_THRESHOLD;
use crate::telemetry::trend::{DEFAULT_TREND_THRESHOLD, DEFAULT_TREND_WINDOW};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:61613";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub engine: Option<EngineSection>,
    #[serde(default)]
    pub occupancy: Option<OccupancySection>,
    #[serde(default)]
    pub location: Option<LocationSection>,
    #[serde(default)]
    pub alerts: Option<AlertsSection>,
    #[serde(default)]
    pub geocode: Option<GeocodeSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EngineSection {
    /// Tick period in milliseconds (default: 5000)
    pub tick_interval_ms: Option<u64>,
    pub history_capacity: Option<usize>,
    /// Count the first tick is compared against (default: 12)
    pub initial_count: Option<u32>,
    /// Detection radius in meters: 25, 50 or 100 (default: 50)
    pub radius: Option<u16>,
    pub spike_threshold: Option<u32>,
    pub cooldown_secs: Option<u32>,
    pub cooldown_step_secs: Option<u32>,
    pub trend_window: Option<usize>,
    pub trend_threshold: Option<f64>,
    pub wait_floor_minutes: Option<u32>,
    pub wait_divisor: Option<u32>,
    pub safe_zone_offset_deg: Option<f64>,
    #[serde(default)]
    pub density: Option<DensitySection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DensitySection {
    pub medium_above: Option<u32>,
    pub heavy_above: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OccupancyKind {
    #[default]
    Synthetic,
    Peers,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OccupancySection {
    pub source: Option<OccupancyKind>,
    /// Fixed RNG seed for the synthetic source; entropy when absent
    pub seed: Option<u64>,
    /// Seconds a peer report stays counted (default: 120)
    pub peer_window_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocationSection {
    pub degraded_accuracy_m: Option<f64>,
    pub fallback_lat: Option<f64>,
    pub fallback_lng: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Memory,
    Tcp,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsSection {
    pub enabled: Option<bool>,
    pub transport: Option<TransportKind>,
    pub broker_addr: Option<String>,
    /// Also run a broker on this address
    pub listen_addr: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
    pub heartbeat_ms: Option<u64>,
    pub subscribe_retry_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeocodeSection {
    pub search_url: Option<String>,
    pub reverse_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let thresholds = self.density_thresholds();
        if thresholds.medium_above >= thresholds.heavy_above {
            return Err(ConfigError::Invalid(format!(
                "engine.density.medium_above ({}) must be below heavy_above ({})",
                thresholds.medium_above, thresholds.heavy_above
            )));
        }
        if self.tick_interval().is_zero() {
            return Err(ConfigError::Invalid(
                "engine.tick_interval_ms must be positive".to_string(),
            ));
        }
        let engine = self.engine_section();
        if engine.history_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "engine.history_capacity must be positive".to_string(),
            ));
        }
        let history_capacity = engine.history_capacity.unwrap_or(DEFAULT_HISTORY_CAPACITY);
        let trend_window = engine.trend_window.unwrap_or(DEFAULT_TREND_WINDOW);
        if trend_window < 2 || trend_window > history_capacity {
            return Err(ConfigError::Invalid(format!(
                "engine.trend_window ({trend_window}) must be between 2 and history_capacity ({history_capacity})"
            )));
        }
        let alerts = self.alert_channel_config();
        if alerts.heartbeat.is_zero() {
            return Err(ConfigError::Invalid(
                "alerts.heartbeat_ms must be positive".to_string(),
            ));
        }
        if alerts.subscribe_retry.is_zero() {
            return Err(ConfigError::Invalid(
                "alerts.subscribe_retry_ms must be positive".to_string(),
            ));
        }
        self.radius()
            .map_err(|err| ConfigError::Invalid(format!("engine.radius: {err}")))?;
        self.fallback_location()
            .map_err(|err| ConfigError::Invalid(format!("location fallback: {err}")))?;
        Ok(())
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }

    fn engine_section(&self) -> EngineSection {
        self.engine.clone().unwrap_or_default()
    }

    /// Returns the tick period (default: 5 seconds)
    pub fn tick_interval(&self) -> Duration {
        let ms = self
            .engine
            .as_ref()
            .and_then(|e| e.tick_interval_ms)
            .unwrap_or(DEFAULT_TICK_INTERVAL_MS);
        Duration::from_millis(ms)
    }

    pub fn radius(&self) -> Result<Radius, crate::error::AppError> {
        match self.engine.as_ref().and_then(|e| e.radius) {
            Some(meters) => Radius::try_from(meters),
            None => Ok(Radius::default()),
        }
    }

    /// Returns density thresholds (default: 15 / 35)
    pub fn density_thresholds(&self) -> DensityThresholds {
        let defaults = DensityThresholds::default();
        let section = self.engine.as_ref().and_then(|e| e.density.as_ref());
        DensityThresholds {
            medium_above: section
                .and_then(|d| d.medium_above)
                .unwrap_or(defaults.medium_above),
            heavy_above: section
                .and_then(|d| d.heavy_above)
                .unwrap_or(defaults.heavy_above),
        }
    }

    /// Where occupancy is sampled before any location is known
    /// (default: 51.505, -0.09).
    pub fn fallback_location(&self) -> Result<Coordinate, crate::error::AppError> {
        let section = self.location.as_ref();
        Coordinate::new(
            section
                .and_then(|l| l.fallback_lat)
                .unwrap_or(DEFAULT_FALLBACK_LOCATION.lat),
            section
                .and_then(|l| l.fallback_lng)
                .unwrap_or(DEFAULT_FALLBACK_LOCATION.lng),
        )
    }

    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let section = self.engine_section();
        Ok(EngineConfig {
            tick_interval: self.tick_interval(),
            history_capacity: section.history_capacity.unwrap_or(DEFAULT_HISTORY_CAPACITY),
            initial_count: section.initial_count.unwrap_or(DEFAULT_INITIAL_COUNT),
            radius: self
                .radius()
                .map_err(|err| ConfigError::Invalid(err.to_string()))?,
            density: self.density_thresholds(),
            spike_threshold: section.spike_threshold.unwrap_or(DEFAULT_SPIKE_THRESHOLD),
            cooldown_secs: section.cooldown_secs.unwrap_or(DEFAULT_COOLDOWN_SECS),
            cooldown_step_secs: section
                .cooldown_step_secs
                .unwrap_or(DEFAULT_COOLDOWN_STEP_SECS),
            trend_window: section.trend_window.unwrap_or(DEFAULT_TREND_WINDOW),
            trend_threshold: section.trend_threshold.unwrap_or(DEFAULT_TREND_THRESHOLD),
            wait_floor_minutes: section
                .wait_floor_minutes
                .unwrap_or(DEFAULT_WAIT_FLOOR_MINUTES),
            wait_divisor: section.wait_divisor.unwrap_or(DEFAULT_WAIT_DIVISOR),
            safe_zone_offset_deg: section
                .safe_zone_offset_deg
                .unwrap_or(DEFAULT_SAFE_ZONE_OFFSET_DEG),
            fallback_location: self
                .fallback_location()
                .map_err(|err| ConfigError::Invalid(err.to_string()))?,
        })
    }

    pub fn occupancy_kind(&self) -> OccupancyKind {
        self.occupancy
            .as_ref()
            .and_then(|o| o.source)
            .unwrap_or_default()
    }

    pub fn occupancy_seed(&self) -> Option<u64> {
        self.occupancy.as_ref().and_then(|o| o.seed)
    }

    /// Returns how long a peer report is counted (default: 120 seconds)
    pub fn peer_window(&self) -> Duration {
        self.occupancy
            .as_ref()
            .and_then(|o| o.peer_window_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_ACTIVE_WINDOW)
    }

    /// Returns the degraded-accuracy threshold in meters (default: 2000)
    pub fn degraded_accuracy_m(&self) -> f64 {
        self.location
            .as_ref()
            .and_then(|l| l.degraded_accuracy_m)
            .unwrap_or(DEFAULT_DEGRADED_ACCURACY_M)
    }

    /// Alerts are on unless explicitly disabled.
    pub fn alerts_enabled(&self) -> bool {
        self.alerts
            .as_ref()
            .and_then(|a| a.enabled)
            .unwrap_or(true)
    }

    pub fn alert_transport(&self) -> TransportKind {
        self.alerts
            .as_ref()
            .and_then(|a| a.transport)
            .unwrap_or_default()
    }

    pub fn broker_addr(&self) -> &str {
        self.alerts
            .as_ref()
            .and_then(|a| a.broker_addr.as_deref())
            .unwrap_or(DEFAULT_BROKER_ADDR)
    }

    pub fn broker_listen_addr(&self) -> Option<&str> {
        let addr = self.alerts.as_ref()?.listen_addr.as_deref()?;
        if addr.is_empty() { None } else { Some(addr) }
    }

    pub fn alert_channel_config(&self) -> AlertChannelConfig {
        let section = self.alerts.as_ref();
        let millis = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };
        AlertChannelConfig {
            reconnect_delay: millis(
                section.and_then(|a| a.reconnect_delay_ms),
                DEFAULT_RECONNECT_DELAY,
            ),
            heartbeat: millis(section.and_then(|a| a.heartbeat_ms), DEFAULT_HEARTBEAT),
            subscribe_retry: millis(
                section.and_then(|a| a.subscribe_retry_ms),
                DEFAULT_SUBSCRIBE_RETRY,
            ),
        }
    }

    pub fn geocode_search_url(&self) -> &str {
        self.geocode
            .as_ref()
            .and_then(|g| g.search_url.as_deref())
            .unwrap_or(DEFAULT_SEARCH_URL)
    }

    pub fn geocode_reverse_url(&self) -> &str {
        self.geocode
            .as_ref()
            .and_then(|g| g.reverse_url.as_deref())
            .unwrap_or(DEFAULT_REVERSE_URL)
    }

    pub fn geocode_user_agent(&self) -> &str {
        self.geocode
            .as_ref()
            .and_then(|g| g.user_agent.as_deref())
            .unwrap_or(DEFAULT_USER_AGENT)
    }

    pub fn geocode_timeout(&self) -> Duration {
        self.geocode
            .as_ref()
            .and_then(|g| g.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }
}
