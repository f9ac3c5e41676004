use crate::error::AppError;
use crate::occupancy::{OccupancyRequest, OccupancySource, Radius};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Lowest and highest variance added to the base count, inclusive.
const VARIANCE_MIN: i64 = -5;
const VARIANCE_MAX: i64 = 14;

/// Random headcounts around a per-radius base: wider radius, more people.
#[derive(Debug)]
pub struct SyntheticSource<R = StdRng> {
    rng: R,
}

impl SyntheticSource<StdRng> {
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl<R: Rng> SyntheticSource<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

pub fn base_count(radius: Radius) -> i64 {
    match radius {
        Radius::Near => 10,
        Radius::Mid => 50,
        Radius::Wide => 120,
    }
}

impl<R: Rng + Send> OccupancySource for SyntheticSource<R> {
    fn sample(&mut self, request: &OccupancyRequest) -> Result<u32, AppError> {
        let variance = self.rng.gen_range(VARIANCE_MIN..=VARIANCE_MAX);
        let count = (base_count(request.radius) + variance).max(0);
        u32::try_from(count).map_err(|err| AppError::Occupancy(err.to_string()))
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}
