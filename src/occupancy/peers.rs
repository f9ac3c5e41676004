//! Headcount from location reports shared by peers over the alert channel.

use crate::alerts::AlertMessage;
use crate::error::AppError;
use crate::location::Coordinate;
use crate::occupancy::{OccupancyRequest, OccupancySource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::debug;

pub const DEFAULT_ACTIVE_WINDOW: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerReport {
    pub peer_id: String,
    pub coordinate: Coordinate,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Counts peers whose latest report is recent and inside the radius.
#[derive(Debug)]
pub struct PeerReportSource {
    latest: HashMap<String, PeerReport>,
    inbox: Option<mpsc::UnboundedReceiver<AlertMessage>>,
    active_window: Duration,
}

impl PeerReportSource {
    pub fn new(active_window: Duration) -> Self {
        Self {
            latest: HashMap::new(),
            inbox: None,
            active_window,
        }
    }

    /// Feed from an alert subscription; non-report messages are ignored.
    pub fn with_inbox(mut self, inbox: mpsc::UnboundedReceiver<AlertMessage>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    pub fn ingest(&mut self, report: PeerReport) {
        let newer = self
            .latest
            .get(&report.peer_id)
            .is_none_or(|existing| existing.timestamp <= report.timestamp);
        if newer {
            self.latest.insert(report.peer_id.clone(), report);
        }
    }

    pub fn active_peers(&self) -> usize {
        self.latest.len()
    }

    fn drain_inbox(&mut self) {
        let mut received = Vec::new();
        if let Some(inbox) = self.inbox.as_mut() {
            while let Ok(message) = inbox.try_recv() {
                if let AlertMessage::PeerReport(report) = message {
                    received.push(report);
                }
            }
        }
        for report in received {
            self.ingest(report);
        }
    }

    fn prune(&mut self, now: OffsetDateTime) {
        let window = self.active_window;
        self.latest.retain(|_, report| {
            let age = now - report.timestamp;
            age <= window
        });
    }
}

impl OccupancySource for PeerReportSource {
    fn sample(&mut self, request: &OccupancyRequest) -> Result<u32, AppError> {
        self.drain_inbox();
        self.prune(request.timestamp);

        let radius_m = f64::from(request.radius.meters());
        let count = self
            .latest
            .values()
            .filter(|report| request.center.distance_m(&report.coordinate) <= radius_m)
            .count();
        debug!(
            active = self.latest.len(),
            in_radius = count,
            "Peer occupancy sampled"
        );
        u32::try_from(count).map_err(|err| AppError::Occupancy(err.to_string()))
    }

    fn name(&self) -> &'static str {
        "peers"
    }
}
