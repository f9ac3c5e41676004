use crate::error::AppError;
use crate::occupancy::{OccupancyRequest, OccupancySource};

/// Replays fixed counts one per tick, then repeats the last one.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    counts: Vec<u32>,
    next_index: usize,
}

impl ScriptedSource {
    pub fn new(counts: Vec<u32>) -> Self {
        Self {
            counts,
            next_index: 0,
        }
    }
}

impl OccupancySource for ScriptedSource {
    fn sample(&mut self, _request: &OccupancyRequest) -> Result<u32, AppError> {
        let count = self
            .counts
            .get(self.next_index)
            .or_else(|| self.counts.last())
            .copied()
            .ok_or_else(|| AppError::Occupancy("scripted source has no counts".to_string()))?;
        self.next_index += 1;
        Ok(count)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
