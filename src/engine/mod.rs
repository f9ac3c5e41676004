//! The telemetry engine: a pure state machine advanced one tick at a time.
//!
//! Each tick takes one headcount and the fused location and runs
//! classification, history, trend, spike, cooldown and advisories in that
//! order. The runtime in [`runtime`] drives it from a periodic timer.

use crate::location::Coordinate;
use crate::occupancy::Radius;
use crate::telemetry::advisory::{
    Advisory, DEFAULT_SAFE_ZONE_OFFSET_DEG, DEFAULT_WAIT_DIVISOR, DEFAULT_WAIT_FLOOR_MINUTES,
    SafeZoneRecommender, WaitTimeEstimator,
};
use crate::telemetry::cooldown::{CooldownTimer, DEFAULT_COOLDOWN_SECS, DEFAULT_COOLDOWN_STEP_SECS};
use crate::telemetry::history::{DEFAULT_HISTORY_CAPACITY, HistoryWindow};
use crate::telemetry::spike::{DEFAULT_SPIKE_THRESHOLD, SpikeDetector, SpikeEvent};
use crate::telemetry::trend::{DEFAULT_TREND_THRESHOLD, DEFAULT_TREND_WINDOW, TrendEstimator, TrendState};
use crate::telemetry::{DensityLevel, DensityThresholds, Sample};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::info;

pub mod runtime;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_INITIAL_COUNT: u32 = 12;
pub const DEFAULT_FALLBACK_LOCATION: Coordinate = Coordinate {
    lat: 51.505,
    lng: -0.09,
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    pub history_capacity: usize,
    /// Count the first tick is compared against for spike detection.
    pub initial_count: u32,
    pub radius: Radius,
    pub density: DensityThresholds,
    pub spike_threshold: u32,
    pub cooldown_secs: u32,
    pub cooldown_step_secs: u32,
    pub trend_window: usize,
    pub trend_threshold: f64,
    pub wait_floor_minutes: u32,
    pub wait_divisor: u32,
    pub safe_zone_offset_deg: f64,
    /// Where occupancy is sampled before any location is known.
    pub fallback_location: Coordinate,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            initial_count: DEFAULT_INITIAL_COUNT,
            radius: Radius::default(),
            density: DensityThresholds::default(),
            spike_threshold: DEFAULT_SPIKE_THRESHOLD,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            cooldown_step_secs: DEFAULT_COOLDOWN_STEP_SECS,
            trend_window: DEFAULT_TREND_WINDOW,
            trend_threshold: DEFAULT_TREND_THRESHOLD,
            wait_floor_minutes: DEFAULT_WAIT_FLOOR_MINUTES,
            wait_divisor: DEFAULT_WAIT_DIVISOR,
            safe_zone_offset_deg: DEFAULT_SAFE_ZONE_OFFSET_DEG,
            fallback_location: DEFAULT_FALLBACK_LOCATION,
        }
    }
}

/// Everything a subscriber needs to render the current crowd picture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub radius: Radius,
    pub count: u32,
    pub density: DensityLevel,
    pub history: Vec<Sample>,
    pub trend: TrendState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_spike: Option<SpikeEvent>,
    pub cooldown_remaining: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_time_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safe_zone: Option<Coordinate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub snapshot: Snapshot,
    pub spike: Option<SpikeEvent>,
    /// Density moved into Heavy on this tick.
    pub entered_heavy: bool,
}

#[derive(Debug)]
pub struct Engine {
    thresholds: DensityThresholds,
    history: HistoryWindow,
    trend: TrendEstimator,
    spikes: SpikeDetector,
    cooldown: CooldownTimer,
    wait_time: WaitTimeEstimator,
    safe_zone: SafeZoneRecommender,
    radius: Radius,
    count: u32,
    density: DensityLevel,
    advisory: Advisory,
    last_tick: Option<OffsetDateTime>,
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            thresholds: config.density,
            history: HistoryWindow::new(config.history_capacity),
            trend: TrendEstimator::new(config.trend_window, config.trend_threshold),
            spikes: SpikeDetector::new(config.spike_threshold),
            cooldown: CooldownTimer::new(config.cooldown_secs, config.cooldown_step_secs),
            wait_time: WaitTimeEstimator::new(config.wait_floor_minutes, config.wait_divisor),
            safe_zone: SafeZoneRecommender::new(config.safe_zone_offset_deg),
            radius: config.radius,
            count: config.initial_count,
            density: config.density.classify(config.initial_count),
            advisory: Advisory::default(),
            last_tick: None,
        }
    }

    pub fn radius(&self) -> Radius {
        self.radius
    }

    pub fn set_radius(&mut self, radius: Radius) {
        if radius != self.radius {
            info!(
                from = self.radius.meters(),
                to = radius.meters(),
                "Detection radius changed"
            );
        }
        self.radius = radius;
    }

    /// Advance by one tick. `location` is the fused coordinate, if any; the
    /// safe zone is only offered when one is known.
    pub fn tick(
        &mut self,
        timestamp: OffsetDateTime,
        count: u32,
        location: Option<Coordinate>,
    ) -> TickOutcome {
        let previous_count = self.count;
        let previous_density = self.density;
        let density = self.thresholds.classify(count);

        let spike = self.spikes.observe(timestamp, previous_count, count);
        self.history.push(Sample {
            timestamp,
            count,
            density,
        });
        self.trend.update(&self.history);
        self.cooldown.on_tick(density);
        self.advisory = Advisory {
            wait_time_minutes: self.wait_time.estimate(density, count),
            safe_zone: self.safe_zone.recommend(density, location),
        };

        if density != previous_density {
            info!(
                count,
                from = ?previous_density,
                to = ?density,
                "Crowd density changed"
            );
        }

        self.count = count;
        self.density = density;
        self.last_tick = Some(timestamp);

        TickOutcome {
            snapshot: self.snapshot(),
            spike,
            entered_heavy: density == DensityLevel::Heavy && previous_density != DensityLevel::Heavy,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            timestamp: self.last_tick.unwrap_or(OffsetDateTime::UNIX_EPOCH),
            radius: self.radius,
            count: self.count,
            density: self.density,
            history: self.history.to_vec(),
            trend: self.trend.state(),
            last_spike: self.spikes.last_spike().copied(),
            cooldown_remaining: self.cooldown.remaining_secs(),
            wait_time_minutes: self.advisory.wait_time_minutes,
            safe_zone: self.advisory.safe_zone,
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}
