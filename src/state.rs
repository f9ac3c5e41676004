use crate::engine::Snapshot;
use crate::location::LocationFusion;

/// State shared between the engine actor and the HTTP layer.
///
/// Location is written by the API and read once per tick; the snapshot is
/// written only by the engine actor.
#[derive(Debug)]
pub struct AppState {
    location: LocationFusion,
    snapshot: Option<Snapshot>,
}

impl AppState {
    pub fn new(location: LocationFusion) -> Self {
        Self {
            location,
            snapshot: None,
        }
    }

    pub fn location(&self) -> &LocationFusion {
        &self.location
    }

    pub fn location_mut(&mut self) -> &mut LocationFusion {
        &mut self.location
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn set_snapshot(&mut self, snapshot: Snapshot) {
        self.snapshot = Some(snapshot);
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(LocationFusion::default())
    }
}
