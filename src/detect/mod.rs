//! Movement detection.
//!
//! - `BackgroundModel`: exponentially-weighted per-pixel scene estimate
//! - `MovementDetector`: foreground mask, morphology, connected components
//! - `MovementHistory`: bounded ring of past movement summaries
//! - `annotate_frame`: draws detections onto a frame copy

mod annotate;
mod background;
mod detector;
mod result;

pub use annotate::annotate_frame;
pub use background::BackgroundModel;
pub use detector::{DetectorConfig, MovementDetector, MovementHistory};
pub use result::{
    DetectionMethod, HistorySummary, MovementEvent, MovementOutcome, MovementRegion,
    MovementSummary,
};
