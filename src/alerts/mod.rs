//! Delivery of engine events to subscribers over a reconnecting
//! publish/subscribe transport.
//!
//! Subscribers pull deserialized [`AlertMessage`]s from a channel. The
//! reconnect and heartbeat state lives on the driver task that owns the
//! transport; nothing is buffered while disconnected (at-most-once).

use crate::engine::Snapshot;
use crate::error::AppError;
use crate::location::{AccuracyNotice, Coordinate};
use crate::occupancy::peers::PeerReport;
use crate::telemetry::spike::SpikeEvent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub mod memory;
pub mod tcp;
pub mod transport;

use transport::{Frame, Transport};

pub const TOPIC_DENSITY: &str = "/topic/density";
pub const TOPIC_SPIKES: &str = "/topic/spikes";
pub const TOPIC_ADVISORIES: &str = "/topic/advisories";
pub const TOPIC_LOCATIONS: &str = "/topic/locations";

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(4);
pub const DEFAULT_SUBSCRIBE_RETRY: Duration = Duration::from_secs(1);

/// Silence longer than this many heartbeat periods ends the session.
const HEARTBEAT_TOLERANCE: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeavyZoneAlert {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub count: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_time_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safe_zone: Option<Coordinate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertMessage {
    Density(Snapshot),
    Spike(SpikeEvent),
    HeavyZone(HeavyZoneAlert),
    AccuracyNotice(AccuracyNotice),
    PeerReport(PeerReport),
}

#[derive(Debug, Clone, Copy)]
pub struct AlertChannelConfig {
    pub reconnect_delay: Duration,
    pub heartbeat: Duration,
    pub subscribe_retry: Duration,
}

impl Default for AlertChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            heartbeat: DEFAULT_HEARTBEAT,
            subscribe_retry: DEFAULT_SUBSCRIBE_RETRY,
        }
    }
}

/// Invoked once after every successful (re)connect.
pub type ConnectCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Debug)]
enum Command {
    Subscribe {
        topic: String,
        sink: mpsc::UnboundedSender<AlertMessage>,
    },
    Publish {
        topic: String,
        body: serde_json::Value,
    },
    Deactivate,
}

struct Driver {
    transport: Box<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    connected: watch::Sender<bool>,
    subscriptions: HashMap<String, Vec<mpsc::UnboundedSender<AlertMessage>>>,
    config: AlertChannelConfig,
    on_connect: Option<ConnectCallback>,
}

enum SessionEnd {
    Deactivated,
    Lost(String),
}

pub struct AlertChannel {
    commands: mpsc::UnboundedSender<Command>,
    connected: watch::Receiver<bool>,
    config: AlertChannelConfig,
    driver: Mutex<Option<Driver>>,
}

impl AlertChannel {
    pub fn new(transport: impl Transport, config: AlertChannelConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = watch::channel(false);
        let driver = Driver {
            transport: Box::new(transport),
            commands: commands_rx,
            connected: connected_tx,
            subscriptions: HashMap::new(),
            config,
            on_connect: None,
        };
        Self {
            commands: commands_tx,
            connected: connected_rx,
            config,
            driver: Mutex::new(Some(driver)),
        }
    }

    /// Activate the transport. Later calls are no-ops.
    pub fn connect(&self) {
        self.activate(None);
    }

    /// Like [`connect`](Self::connect), running `on_connect` after each
    /// successful handshake.
    pub fn connect_with(&self, on_connect: ConnectCallback) {
        self.activate(Some(on_connect));
    }

    fn activate(&self, on_connect: Option<ConnectCallback>) {
        let driver = match self.driver.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => {
                warn!("Alert channel lock poisoned while connecting");
                None
            }
        };
        let Some(mut driver) = driver else {
            debug!("Alert channel already active");
            return;
        };
        driver.on_connect = on_connect;
        tokio::spawn(driver.run());
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    /// Messages published on `topic`, delivered once connected.
    ///
    /// While disconnected the subscribe request is retried on a fixed delay
    /// with no limit on attempts.
    pub fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<AlertMessage> {
        let (sink, messages) = mpsc::unbounded_channel();
        let commands = self.commands.clone();
        let mut connected = self.connected.clone();
        let retry = self.config.subscribe_retry;
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                if *connected.borrow_and_update() {
                    let _ = commands.send(Command::Subscribe { topic, sink });
                    return;
                }
                warn!(
                    topic,
                    retry_ms = retry.as_millis(),
                    "Alert channel not connected, retrying subscribe"
                );
                tokio::time::sleep(retry).await;
                if commands.is_closed() {
                    return;
                }
            }
        });

        messages
    }

    pub fn publish(&self, topic: &str, message: &AlertMessage) -> Result<(), AppError> {
        let body = serde_json::to_value(message).map_err(|err| AppError::Alert(err.to_string()))?;
        self.commands
            .send(Command::Publish {
                topic: topic.to_string(),
                body,
            })
            .map_err(|_| AppError::Alert("channel deactivated".to_string()))
    }

    /// Stop the transport. Pending subscribe retries end with it.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Deactivate);
    }
}

impl std::fmt::Debug for AlertChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertChannel")
            .field("connected", &self.is_connected())
            .field("config", &self.config)
            .finish()
    }
}

impl Driver {
    async fn run(mut self) {
        loop {
            match self.transport.connect().await {
                Ok(()) => {
                    info!("Alert channel connected");
                    self.connected.send_replace(true);
                    let end = match self.resubscribe().await {
                        Ok(()) => {
                            if let Some(on_connect) = self.on_connect.as_ref() {
                                on_connect();
                            }
                            self.session().await
                        }
                        Err(err) => SessionEnd::Lost(err),
                    };
                    self.connected.send_replace(false);
                    match end {
                        SessionEnd::Deactivated => break,
                        SessionEnd::Lost(reason) => {
                            warn!(
                                reason,
                                delay_ms = self.config.reconnect_delay.as_millis(),
                                "Alert channel disconnected, reconnecting"
                            );
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        delay_ms = self.config.reconnect_delay.as_millis(),
                        "Alert channel connect failed, retrying"
                    );
                }
            }

            if !self.wait_for_reconnect().await {
                break;
            }
        }

        self.transport.close().await;
        self.connected.send_replace(false);
        info!("Alert channel deactivated");
    }

    async fn resubscribe(&mut self) -> Result<(), String> {
        let topics: Vec<String> = self.subscriptions.keys().cloned().collect();
        for topic in topics {
            self.transport
                .send(Frame::Subscribe { topic })
                .await
                .map_err(|err| err.to_string())?;
        }
        Ok(())
    }

    async fn session(&mut self) -> SessionEnd {
        let period = self.config.heartbeat;
        let silence_limit = period * HEARTBEAT_TOLERANCE;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                frame = self.transport.recv() => match frame {
                    Ok(frame) => {
                        last_inbound = Instant::now();
                        if let Some(end) = self.dispatch(frame) {
                            return end;
                        }
                    }
                    Err(err) => return SessionEnd::Lost(err.to_string()),
                },
                command = self.commands.recv() => match command {
                    None | Some(Command::Deactivate) => return SessionEnd::Deactivated,
                    Some(Command::Publish { topic, body }) => {
                        if let Err(err) = self.transport.send(Frame::Publish { topic, body }).await {
                            return SessionEnd::Lost(err.to_string());
                        }
                    }
                    Some(Command::Subscribe { topic, sink }) => {
                        if self.add_subscription(topic.clone(), sink)
                            && let Err(err) = self.transport.send(Frame::Subscribe { topic }).await
                        {
                            return SessionEnd::Lost(err.to_string());
                        }
                    }
                },
                _ = heartbeat.tick() => {
                    if last_inbound.elapsed() > silence_limit {
                        return SessionEnd::Lost("heartbeat timeout".to_string());
                    }
                    if let Err(err) = self.transport.send(Frame::Heartbeat).await {
                        return SessionEnd::Lost(err.to_string());
                    }
                }
            }
        }
    }

    /// Sleep out the reconnect delay while still honouring commands.
    /// Returns false when deactivated.
    async fn wait_for_reconnect(&mut self) -> bool {
        let delay = tokio::time::sleep(self.config.reconnect_delay);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => return true,
                command = self.commands.recv() => match command {
                    None | Some(Command::Deactivate) => return false,
                    Some(Command::Publish { topic, .. }) => {
                        debug!(topic, "Dropping publish while disconnected");
                    }
                    Some(Command::Subscribe { topic, sink }) => {
                        self.add_subscription(topic, sink);
                    }
                },
            }
        }
    }

    /// Returns true when this is the first sink for the topic.
    fn add_subscription(
        &mut self,
        topic: String,
        sink: mpsc::UnboundedSender<AlertMessage>,
    ) -> bool {
        let sinks = self.subscriptions.entry(topic).or_default();
        sinks.push(sink);
        sinks.len() == 1
    }

    fn dispatch(&mut self, frame: Frame) -> Option<SessionEnd> {
        match frame {
            Frame::Message { topic, body } => {
                let message: AlertMessage = match serde_json::from_value(body) {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(topic, error = %err, "Dropping undecodable alert message");
                        return None;
                    }
                };
                if let Some(sinks) = self.subscriptions.get_mut(&topic) {
                    sinks.retain(|sink| sink.send(message.clone()).is_ok());
                }
                None
            }
            Frame::Disconnect => Some(SessionEnd::Lost("broker closed session".to_string())),
            Frame::Heartbeat | Frame::Connected => None,
            Frame::Connect | Frame::Subscribe { .. } | Frame::Publish { .. } => {
                debug!("Ignoring client-side frame from broker");
                None
            }
        }
    }
}
