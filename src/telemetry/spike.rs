use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

pub const DEFAULT_SPIKE_THRESHOLD: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpikeEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub previous_count: u32,
    pub new_count: u32,
}

/// Flags a single-tick increase strictly greater than the threshold.
/// No hysteresis: consecutive ticks can each fire.
#[derive(Debug, Clone)]
pub struct SpikeDetector {
    threshold: u32,
    last_spike: Option<SpikeEvent>,
}

impl SpikeDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            last_spike: None,
        }
    }

    pub fn observe(
        &mut self,
        timestamp: OffsetDateTime,
        previous_count: u32,
        new_count: u32,
    ) -> Option<SpikeEvent> {
        let diff = i64::from(new_count) - i64::from(previous_count);
        if diff <= i64::from(self.threshold) {
            return None;
        }

        let event = SpikeEvent {
            timestamp,
            previous_count,
            new_count,
        };
        info!(previous_count, new_count, "Crowd spike detected");
        self.last_spike = Some(event);
        Some(event)
    }

    pub fn last_spike(&self) -> Option<&SpikeEvent> {
        self.last_spike.as_ref()
    }
}

impl Default for SpikeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_SPIKE_THRESHOLD)
    }
}
