use serde::{Deserialize, Serialize};

/// Axis-aligned bounding region of movement within one frame.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MovementRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Connected-component area in pixels (not the bounding-box area).
    pub area: u64,
    pub centroid_x: u32,
    pub centroid_y: u32,
}

/// Detection method tag carried on every event.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    AdaptiveBackground,
}

/// One detection cycle's full result.
///
/// Invariant: `detected() == !regions.is_empty()` and
/// `region_count == regions.len()`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MovementEvent {
    pub timestamp_ms: u64,
    pub regions: Vec<MovementRegion>,
    pub region_count: usize,
    pub total_area: u64,
    /// Percentage of the frame area classified as foreground (0-100,
    /// rounded to 2 decimals).
    pub intensity: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub method: DetectionMethod,
}

impl MovementEvent {
    pub fn detected(&self) -> bool {
        !self.regions.is_empty()
    }

    pub fn summary(&self) -> MovementSummary {
        MovementSummary {
            timestamp_ms: self.timestamp_ms,
            region_count: self.region_count,
            total_area: self.total_area,
            intensity: self.intensity,
        }
    }
}

/// Outcome of one `detect` call.
#[derive(Clone, Debug)]
pub enum MovementOutcome {
    Detected(MovementEvent),
    NoMovement(MovementEvent),
    /// Background model still seeding; history is untouched.
    WarmingUp { frames_remaining: u32 },
    /// Frame was unusable; detector state is untouched.
    Error { reason: String },
}

impl MovementOutcome {
    pub fn event(&self) -> Option<&MovementEvent> {
        match self {
            MovementOutcome::Detected(event) | MovementOutcome::NoMovement(event) => Some(event),
            _ => None,
        }
    }

    pub fn is_detected(&self) -> bool {
        matches!(self, MovementOutcome::Detected(_))
    }
}

/// Compact per-event history entry. Full region lists are not historized;
/// the encrypted store holds those.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MovementSummary {
    pub timestamp_ms: u64,
    pub region_count: usize,
    pub total_area: u64,
    pub intensity: f64,
}

/// Aggregate statistics over the movement history.
#[derive(Clone, Debug, Default, Serialize)]
pub struct HistorySummary {
    pub total_detections: usize,
    pub average_intensity: f64,
    pub max_intensity: f64,
    pub min_intensity: f64,
    pub last_detection_ms: Option<u64>,
}
