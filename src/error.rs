use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid radius: {0}m (expected 25, 50 or 100)")]
    InvalidRadius(u16),
    #[error("invalid coordinate: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },
    #[error("occupancy source error: {0}")]
    Occupancy(String),
    #[error("alert channel error: {0}")]
    Alert(String),
    #[error("engine stopped")]
    EngineStopped,
    #[error("state lock poisoned")]
    StateLock,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_radius_message_lists_allowed_values() {
        let err = AppError::InvalidRadius(75);

        assert_eq!(err.to_string(), "invalid radius: 75m (expected 25, 50 or 100)");
    }
}
