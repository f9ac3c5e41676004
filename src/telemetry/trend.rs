use crate::telemetry::history::HistoryWindow;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TREND_WINDOW: usize = 3;
pub const DEFAULT_TREND_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendState {
    pub direction: TrendDirection,
    /// Count change over the window divided by the number of samples in it,
    /// rounded to one decimal. Labelled per minute for display.
    #[serde(rename = "delta")]
    pub delta_per_minute: f64,
}

impl Default for TrendState {
    fn default() -> Self {
        Self {
            direction: TrendDirection::Stable,
            delta_per_minute: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrendEstimator {
    window: usize,
    threshold: f64,
    state: TrendState,
}

impl TrendEstimator {
    pub fn new(window: usize, threshold: f64) -> Self {
        Self {
            window: window.max(2),
            threshold,
            state: TrendState::default(),
        }
    }

    /// Recompute once the history holds a full window of samples; otherwise
    /// keep the previous state.
    pub fn update(&mut self, history: &HistoryWindow) -> TrendState {
        if history.len() < self.window {
            return self.state;
        }

        let recent = history.recent(self.window);
        let (Some(oldest), Some(newest)) = (recent.first(), recent.last()) else {
            return self.state;
        };

        let change = f64::from(newest.count) - f64::from(oldest.count);
        let delta = change / recent.len() as f64;
        let direction = if delta > self.threshold {
            TrendDirection::Rising
        } else if delta < -self.threshold {
            TrendDirection::Falling
        } else {
            TrendDirection::Stable
        };

        self.state = TrendState {
            direction,
            delta_per_minute: (delta * 10.0).round() / 10.0,
        };
        self.state
    }

    pub fn state(&self) -> TrendState {
        self.state
    }
}

impl Default for TrendEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_TREND_WINDOW, DEFAULT_TREND_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{DensityLevel, Sample};
    use time::OffsetDateTime;

    fn history(counts: &[u32]) -> HistoryWindow {
        let mut window = HistoryWindow::default();
        for count in counts {
            window.push(Sample {
                timestamp: OffsetDateTime::UNIX_EPOCH,
                count: *count,
                density: DensityLevel::Low,
            });
        }
        window
    }

    #[test]
    fn rising_trend_divides_by_sample_count() {
        let mut estimator = TrendEstimator::default();

        let state = estimator.update(&history(&[10, 14, 32, 50]));

        assert_eq!(state.direction, TrendDirection::Rising);
        assert_eq!(state.delta_per_minute, 12.0);
    }

    #[test]
    fn falling_trend() {
        let mut estimator = TrendEstimator::default();

        let state = estimator.update(&history(&[60, 55, 50]));

        assert_eq!(state.direction, TrendDirection::Falling);
        assert_eq!(state.delta_per_minute, -3.3);
    }

    #[test]
    fn small_change_is_stable() {
        let mut estimator = TrendEstimator::default();

        // (51 - 50) / 3 = 0.33, inside the +/-0.5 band
        let state = estimator.update(&history(&[50, 49, 51]));

        assert_eq!(state.direction, TrendDirection::Stable);
        assert_eq!(state.delta_per_minute, 0.3);
    }

    #[test]
    fn direction_uses_unrounded_delta() {
        let mut estimator = TrendEstimator::new(3, 0.5);

        // 2 / 3 = 0.67 rising; rounded display 0.7
        let state = estimator.update(&history(&[10, 10, 12]));

        assert_eq!(state.direction, TrendDirection::Rising);
        assert_eq!(state.delta_per_minute, 0.7);
    }

    #[test]
    fn keeps_previous_state_with_two_or_fewer_samples() {
        let mut estimator = TrendEstimator::default();
        assert_eq!(estimator.update(&history(&[10, 90])), TrendState::default());

        estimator.update(&history(&[10, 14, 32]));
        let held = estimator.update(&history(&[1, 2]));

        assert_eq!(held.direction, TrendDirection::Rising);
        assert_eq!(held.delta_per_minute, 7.3);
    }
}
