use crate::telemetry::Sample;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Bounded FIFO of recent samples in arrival order.
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl HistoryWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest when over capacity.
    pub fn push(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// The last `n` samples, oldest first. Fewer when the window is shorter.
    pub fn recent(&self, n: usize) -> Vec<Sample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::DensityLevel;
    use time::{Duration, OffsetDateTime};

    fn sample(count: u32) -> Sample {
        Sample {
            timestamp: OffsetDateTime::UNIX_EPOCH + Duration::seconds(i64::from(count) * 5),
            count,
            density: DensityLevel::Low,
        }
    }

    #[test]
    fn evicts_oldest_after_capacity() {
        let mut window = HistoryWindow::default();

        for count in 0..21 {
            window.push(sample(count));
        }

        let counts: Vec<u32> = window.to_vec().iter().map(|s| s.count).collect();
        assert_eq!(window.len(), 20);
        assert_eq!(counts, (1..21).collect::<Vec<_>>());
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut window = HistoryWindow::new(3);

        for count in 0..50 {
            window.push(sample(count));
            assert!(window.len() <= 3);
        }
        assert_eq!(window.to_vec().last().map(|s| s.count), Some(49));
    }

    #[test]
    fn recent_returns_tail_in_arrival_order() {
        let mut window = HistoryWindow::default();
        for count in [10, 14, 32, 50] {
            window.push(sample(count));
        }

        let counts: Vec<u32> = window.recent(3).iter().map(|s| s.count).collect();

        assert_eq!(counts, vec![14, 32, 50]);
    }

    #[test]
    fn recent_returns_fewer_when_short() {
        let mut window = HistoryWindow::default();
        window.push(sample(7));

        assert_eq!(window.recent(3).len(), 1);
        assert!(HistoryWindow::default().recent(3).is_empty());
    }
}
