//! Tokio actor that owns the [`Engine`] and its occupancy source.
//!
//! Ticks and commands are handled one at a time on a single task, so tick
//! state is never mutated concurrently and ticks never overlap.

use crate::alerts::{
    AlertChannel, AlertMessage, HeavyZoneAlert, TOPIC_ADVISORIES, TOPIC_DENSITY, TOPIC_LOCATIONS,
    TOPIC_SPIKES,
};
use crate::engine::{Engine, EngineConfig, Snapshot, TickOutcome};
use crate::error::AppError;
use crate::location::Coordinate;
use crate::occupancy::peers::PeerReport;
use crate::occupancy::{OccupancyRequest, OccupancySource, Radius};
use crate::state::AppState;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const HEAVY_ZONE_MESSAGE: &str = "You are in a HEAVY crowd zone";

#[derive(Debug)]
enum EngineCommand {
    SetRadius(Radius),
    SetPassive(bool),
    Stop,
}

/// Cloneable control surface for a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    state: Arc<RwLock<AppState>>,
}

impl EngineHandle {
    /// Takes effect from the next tick.
    pub fn set_radius(&self, radius: Radius) -> Result<(), AppError> {
        self.send(EngineCommand::SetRadius(radius))
    }

    /// Passive mode stops sharing this node's location with peers.
    pub fn set_passive(&self, enabled: bool) -> Result<(), AppError> {
        self.send(EngineCommand::SetPassive(enabled))
    }

    /// Fails with [`AppError::EngineStopped`] once the actor has exited.
    pub fn set_manual_location(&self, coordinate: Coordinate) -> Result<(), AppError> {
        self.ensure_running()?;
        let mut guard = self.state.write().map_err(|_| AppError::StateLock)?;
        guard.location_mut().set_manual(coordinate)
    }

    pub fn reset_to_gps(&self) -> Result<(), AppError> {
        self.ensure_running()?;
        let mut guard = self.state.write().map_err(|_| AppError::StateLock)?;
        guard.location_mut().reset_to_gps();
        Ok(())
    }

    /// Latest published snapshot, `None` before the first tick.
    pub fn snapshot(&self) -> Result<Option<Snapshot>, AppError> {
        let guard = self.state.read().map_err(|_| AppError::StateLock)?;
        Ok(guard.snapshot().cloned())
    }

    pub fn stop(&self) {
        let _ = self.commands.send(EngineCommand::Stop);
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    fn ensure_running(&self) -> Result<(), AppError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(AppError::EngineStopped)
        }
    }

    fn send(&self, command: EngineCommand) -> Result<(), AppError> {
        self.commands
            .send(command)
            .map_err(|_| AppError::EngineStopped)
    }
}

struct EngineActor<S> {
    engine: Engine,
    source: S,
    state: Arc<RwLock<AppState>>,
    alerts: Option<Arc<AlertChannel>>,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
    tick_interval: Duration,
    fallback_location: Coordinate,
    node_id: String,
    passive: bool,
}

/// Start the engine on the current tokio runtime. The first tick runs one
/// period after spawning.
pub fn spawn_engine<S>(
    config: &EngineConfig,
    source: S,
    state: Arc<RwLock<AppState>>,
    alerts: Option<Arc<AlertChannel>>,
) -> (EngineHandle, JoinHandle<()>)
where
    S: OccupancySource + 'static,
{
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let actor = EngineActor {
        engine: Engine::new(config),
        source,
        state: Arc::clone(&state),
        alerts,
        commands: commands_rx,
        tick_interval: config.tick_interval,
        fallback_location: config.fallback_location,
        node_id: format!("node-{:08x}", rand::random::<u32>()),
        passive: false,
    };
    let handle = EngineHandle {
        commands: commands_tx,
        state,
    };
    (handle, tokio::spawn(actor.run()))
}

impl<S: OccupancySource> EngineActor<S> {
    async fn run(mut self) {
        info!(
            node_id = %self.node_id,
            source = self.source.name(),
            interval_ms = self.tick_interval.as_millis(),
            radius_m = self.engine.radius().meters(),
            "Engine started"
        );
        let period = self.tick_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(EngineCommand::SetRadius(radius)) => self.engine.set_radius(radius),
                    Some(EngineCommand::SetPassive(enabled)) => {
                        info!(enabled, "Passive mode changed");
                        self.passive = enabled;
                    }
                    None | Some(EngineCommand::Stop) => break,
                },
                _ = ticker.tick() => self.run_tick(OffsetDateTime::now_utc()),
            }
        }

        self.commands.close();
        if let Ok(mut guard) = self.state.write() {
            guard.location_mut().set_tracking_enabled(false);
        }
        if let Some(alerts) = self.alerts.as_ref() {
            alerts.disconnect();
        }
        info!("Engine stopped");
    }

    fn run_tick(&mut self, timestamp: OffsetDateTime) {
        let location = match self.state.read() {
            Ok(guard) => guard.location().current().coordinate,
            Err(_) => {
                warn!("State lock poisoned while reading location, skipping tick");
                return;
            }
        };

        let request = OccupancyRequest {
            timestamp,
            radius: self.engine.radius(),
            center: location.unwrap_or(self.fallback_location),
        };
        let count = match self.source.sample(&request) {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, source = self.source.name(), "Occupancy sample failed, skipping tick");
                return;
            }
        };

        let outcome = self.engine.tick(timestamp, count, location);
        debug!(
            count,
            density = ?outcome.snapshot.density,
            trend = ?outcome.snapshot.trend.direction,
            "Tick complete"
        );

        match self.state.write() {
            Ok(mut guard) => guard.set_snapshot(outcome.snapshot.clone()),
            Err(_) => warn!("State lock poisoned while storing snapshot"),
        }

        self.publish_outcome(outcome, location);
    }

    fn publish_outcome(&self, outcome: TickOutcome, location: Option<Coordinate>) {
        let Some(alerts) = self.alerts.as_ref() else {
            return;
        };

        let mut messages = vec![(
            TOPIC_DENSITY,
            AlertMessage::Density(outcome.snapshot.clone()),
        )];
        if let Some(spike) = outcome.spike {
            messages.push((TOPIC_SPIKES, AlertMessage::Spike(spike)));
        }
        if outcome.entered_heavy {
            messages.push((
                TOPIC_ADVISORIES,
                AlertMessage::HeavyZone(HeavyZoneAlert {
                    timestamp: outcome.snapshot.timestamp,
                    count: outcome.snapshot.count,
                    message: HEAVY_ZONE_MESSAGE.to_string(),
                    wait_time_minutes: outcome.snapshot.wait_time_minutes,
                    safe_zone: outcome.snapshot.safe_zone,
                }),
            ));
        }
        if let (Some(coordinate), false) = (location, self.passive) {
            messages.push((
                TOPIC_LOCATIONS,
                AlertMessage::PeerReport(PeerReport {
                    peer_id: self.node_id.clone(),
                    coordinate,
                    timestamp: outcome.snapshot.timestamp,
                }),
            ));
        }

        for (topic, message) in messages {
            if let Err(err) = alerts.publish(topic, &message) {
                warn!(topic, error = %err, "Failed to publish alert");
            }
        }
    }
}
