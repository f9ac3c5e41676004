use crate::error::AppError;
use crate::location::Coordinate;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod peers;
pub mod scripted;
pub mod synthetic;

/// Detection radius around the fused location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Radius {
    Near,
    #[default]
    Mid,
    Wide,
}

impl Radius {
    pub fn meters(self) -> u16 {
        match self {
            Radius::Near => 25,
            Radius::Mid => 50,
            Radius::Wide => 100,
        }
    }
}

impl TryFrom<u16> for Radius {
    type Error = AppError;

    fn try_from(meters: u16) -> Result<Self, Self::Error> {
        match meters {
            25 => Ok(Radius::Near),
            50 => Ok(Radius::Mid),
            100 => Ok(Radius::Wide),
            other => Err(AppError::InvalidRadius(other)),
        }
    }
}

impl From<Radius> for u16 {
    fn from(radius: Radius) -> Self {
        radius.meters()
    }
}

/// What a source is asked for on each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccupancyRequest {
    pub timestamp: OffsetDateTime,
    pub radius: Radius,
    pub center: Coordinate,
}

/// Produces one headcount per tick.
pub trait OccupancySource: Send {
    fn sample(&mut self, request: &OccupancyRequest) -> Result<u32, AppError>;

    fn name(&self) -> &'static str;
}

impl<S: OccupancySource + ?Sized> OccupancySource for Box<S> {
    fn sample(&mut self, request: &OccupancyRequest) -> Result<u32, AppError> {
        (**self).sample(request)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
