//! API shared state

use std::path::PathBuf;

use crate::registry::NodeRegistry;
use crate::room::Room;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Room whose alerts and frames this server exposes
    pub room: Room,

    /// Threshold file updated by `PUT /api/v1/thresholds`
    pub thresholds_path: Option<PathBuf>,
}

impl ApiState {
    pub fn new(room: Room, thresholds_path: Option<PathBuf>) -> Self {
        Self {
            room,
            thresholds_path,
        }
    }

    pub fn registry(&self) -> Option<&NodeRegistry> {
        self.room.registry()
    }
}
