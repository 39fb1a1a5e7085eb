//! Frame capture.
//!
//! This module provides the camera-facing half of the pipeline:
//! - `Frame`: decoded RGB pixel buffer with dimensions and capture timestamp
//! - `CameraSource`: device lifecycle, per-cycle capture, JPEG encoding
//!
//! Real hardware backends are feature-gated; `stub://` device paths always
//! select a synthetic scene generator so the rest of the pipeline can run
//! (and be tested) without a camera attached.

mod camera;
mod frame;

pub use camera::{CameraConfig, CameraDevice, CameraInfo, CameraSource};
pub use frame::Frame;
