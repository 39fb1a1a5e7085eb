//! Camera source.
//!
//! `CameraSource` owns a video device for the lifetime of a monitoring
//! session and produces decoded `Frame` instances on demand.
//!
//! Backends:
//! - `stub://` device paths select a synthetic scene generator (tests, demo)
//! - `/dev/video*` paths select the V4L2 backend (feature: capture-v4l2)
//!
//! The source is owned exclusively by the monitoring worker while a session
//! is running; no other code path may call `capture_frame` concurrently.

use anyhow::Result;
#[cfg(not(feature = "capture-v4l2"))]
use anyhow::anyhow;
use serde::Serialize;

use crate::capture::frame::Frame;
use crate::now_ms;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or "stub://scene" for synthetic.
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Target frame rate (frames per second).
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "stub://scene".to_string(),
            width: 640,
            height: 480,
            fps: 20,
        }
    }
}

/// Camera diagnostics surfaced to `start_monitoring` callers and statistics.
#[derive(Clone, Debug, Serialize)]
pub struct CameraInfo {
    pub active: bool,
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frames_captured: u64,
}

/// An enumerated capture device.
#[derive(Clone, Debug, Serialize)]
pub struct CameraDevice {
    pub index: u32,
    pub path: String,
    pub backend: &'static str,
}

pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "capture-v4l2")]
    V4l2(V4l2Camera),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            });
        }
        #[cfg(feature = "capture-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::V4l2(V4l2Camera::new(config)?),
            })
        }
        #[cfg(not(feature = "capture-v4l2"))]
        {
            Err(anyhow!(
                "device '{}' requires the capture-v4l2 feature",
                config.device
            ))
        }
    }

    /// Acquire the device. Fails with a diagnostic error when the device is
    /// missing or cannot be opened; the caller surfaces this to the
    /// `start_monitoring` caller rather than retrying.
    pub fn start(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.start(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::V4l2(camera) => camera.start(),
        }
    }

    /// Release the device. Safe to call when `start` failed or never ran.
    pub fn stop(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.stop(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::V4l2(camera) => camera.stop(),
        }
    }

    pub fn is_active(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(camera) => camera.active,
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::V4l2(camera) => camera.active(),
        }
    }

    /// Capture one frame. Returns `None` on transient capture failure or when
    /// the source is not active; the worker treats that as "retry shortly".
    pub fn capture_frame(&mut self) -> Option<Frame> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.capture_frame(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::V4l2(camera) => camera.capture_frame(),
        }
    }

    /// Capture one frame and encode it as JPEG bytes.
    pub fn encode_frame(&mut self, quality: u8) -> Option<Vec<u8>> {
        let frame = self.capture_frame()?;
        frame.encode_jpeg(quality).ok()
    }

    pub fn info(&self) -> CameraInfo {
        match &self.backend {
            CameraBackend::Synthetic(camera) => camera.info(),
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::V4l2(camera) => camera.info(),
        }
    }

    pub fn device(&self) -> &str {
        match &self.backend {
            CameraBackend::Synthetic(camera) => &camera.config.device,
            #[cfg(feature = "capture-v4l2")]
            CameraBackend::V4l2(camera) => camera.device(),
        }
    }

    /// Enumerate capture devices by probing `/dev/video0..max_probe`.
    pub fn list_devices(max_probe: u32) -> Vec<CameraDevice> {
        let mut devices = Vec::new();
        for index in 0..max_probe {
            let path = format!("/dev/video{}", index);
            if std::fs::metadata(&path).is_ok() {
                devices.push(CameraDevice {
                    index,
                    path,
                    backend: "v4l2",
                });
            }
        }
        devices
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://) for tests and the demo
// ----------------------------------------------------------------------------

/// Synthetic scene: a flat background with a bright block that slides one
/// step per frame, so a warmed-up detector sees sustained movement.
struct SyntheticCamera {
    config: CameraConfig,
    active: bool,
    frame_count: u64,
}

const BLOCK_SIZE: u32 = 64;
const BLOCK_STEP: u64 = 12;
const BACKGROUND_LUMA: u8 = 24;
const BLOCK_LUMA: u8 = 230;

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            active: false,
            frame_count: 0,
        }
    }

    fn start(&mut self) -> Result<()> {
        self.active = true;
        log::info!(
            "CameraSource: acquired {} (synthetic, {}x{})",
            self.config.device,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.active = false;
    }

    fn capture_frame(&mut self) -> Option<Frame> {
        if !self.active {
            return None;
        }
        self.frame_count += 1;

        let width = self.config.width;
        let height = self.config.height;
        let mut pixels = vec![BACKGROUND_LUMA; (width * height * 3) as usize];

        // Slide the block across the scene, wrapping at the right edge.
        let travel = width.saturating_sub(BLOCK_SIZE).max(1) as u64;
        let block_x = ((self.frame_count * BLOCK_STEP) % travel) as u32;
        let block_y = height / 3;
        for y in block_y..(block_y + BLOCK_SIZE).min(height) {
            for x in block_x..(block_x + BLOCK_SIZE).min(width) {
                let offset = ((y * width + x) * 3) as usize;
                pixels[offset..offset + 3].fill(BLOCK_LUMA);
            }
        }

        Some(Frame::new(pixels, width, height, now_ms()))
    }

    fn info(&self) -> CameraInfo {
        CameraInfo {
            active: self.active,
            device: self.config.device.clone(),
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
            frames_captured: self.frame_count,
        }
    }
}

// ----------------------------------------------------------------------------
// Production camera using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "capture-v4l2")]
mod v4l2 {
    use anyhow::{Context, Result};
    use ouroboros::self_referencing;

    use super::{CameraConfig, CameraInfo};
    use crate::capture::frame::Frame;
    use crate::now_ms;

    pub(super) struct V4l2Camera {
        config: CameraConfig,
        state: Option<V4l2State>,
        frame_count: u64,
        active_width: u32,
        active_height: u32,
    }

    #[self_referencing]
    struct V4l2State {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    impl V4l2Camera {
        pub(super) fn new(config: CameraConfig) -> Result<Self> {
            Ok(Self {
                active_width: config.width,
                active_height: config.height,
                config,
                state: None,
                frame_count: 0,
            })
        }

        pub(super) fn start(&mut self) -> Result<()> {
            use v4l::buffer::Type;
            use v4l::video::Capture;

            let mut device = v4l::Device::with_path(&self.config.device)
                .with_context(|| format!("open v4l2 device {}", self.config.device))?;
            let mut format = device.format().context("read v4l2 format")?;
            format.width = self.config.width;
            format.height = self.config.height;
            format.fourcc = v4l::FourCC::new(b"RGB3");

            let format = match device.set_format(&format) {
                Ok(format) => format,
                Err(err) => {
                    log::warn!(
                        "CameraSource: failed to set format on {}: {}",
                        self.config.device,
                        err
                    );
                    device
                        .format()
                        .context("read v4l2 format after set failure")?
                }
            };

            if self.config.fps > 0 {
                let params = v4l::video::capture::Parameters::with_fps(self.config.fps);
                if let Err(err) = device.set_params(&params) {
                    log::warn!(
                        "CameraSource: failed to set fps on {}: {}",
                        self.config.device,
                        err
                    );
                }
            }

            self.active_width = format.width;
            self.active_height = format.height;

            let state = V4l2StateBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                        .map_err(|err| {
                            anyhow::Error::new(err).context("create v4l2 buffer stream")
                        })
                },
            }
            .try_build()?;
            self.state = Some(state);

            log::info!(
                "CameraSource: acquired {} ({}x{})",
                self.config.device,
                self.active_width,
                self.active_height
            );
            Ok(())
        }

        pub(super) fn stop(&mut self) {
            self.state = None;
        }

        pub(super) fn active(&self) -> bool {
            self.state.is_some()
        }

        pub(super) fn capture_frame(&mut self) -> Option<Frame> {
            use v4l::io::traits::CaptureStream;

            let state = self.state.as_mut()?;
            let pixels = match state.with_mut(|fields| {
                fields.stream.next().map(|(buf, _meta)| buf.to_vec())
            }) {
                Ok(pixels) => pixels,
                Err(err) => {
                    log::debug!("CameraSource: capture failed: {}", err);
                    return None;
                }
            };

            self.frame_count += 1;
            Some(Frame::new(
                pixels,
                self.active_width,
                self.active_height,
                now_ms(),
            ))
        }

        pub(super) fn info(&self) -> CameraInfo {
            CameraInfo {
                active: self.active(),
                device: self.config.device.clone(),
                width: self.active_width,
                height: self.active_height,
                fps: self.config.fps,
                frames_captured: self.frame_count,
            }
        }

        pub(super) fn device(&self) -> &str {
            &self.config.device
        }
    }
}

#[cfg(feature = "capture-v4l2")]
use v4l2::V4l2Camera;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://test".to_string(),
            width: 320,
            height: 240,
            fps: 20,
        }
    }

    #[test]
    fn synthetic_camera_produces_frames_once_started() -> Result<()> {
        let mut camera = CameraSource::new(stub_config())?;
        assert!(camera.capture_frame().is_none());

        camera.start()?;
        let frame = camera.capture_frame().expect("frame");
        assert_eq!(frame.width(), 320);
        assert_eq!(frame.height(), 240);
        assert!(frame.is_well_formed());
        Ok(())
    }

    #[test]
    fn synthetic_scene_moves_between_frames() -> Result<()> {
        let mut camera = CameraSource::new(stub_config())?;
        camera.start()?;
        let first = camera.capture_frame().unwrap();
        let second = camera.capture_frame().unwrap();
        assert_ne!(first.pixels(), second.pixels());
        Ok(())
    }

    #[test]
    fn stop_is_idempotent() -> Result<()> {
        let mut camera = CameraSource::new(stub_config())?;
        camera.stop();
        camera.start()?;
        camera.stop();
        camera.stop();
        assert!(!camera.is_active());
        assert!(camera.capture_frame().is_none());
        Ok(())
    }

    #[test]
    fn encode_frame_yields_jpeg() -> Result<()> {
        let mut camera = CameraSource::new(stub_config())?;
        camera.start()?;
        let jpeg = camera.encode_frame(85).expect("jpeg bytes");
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        Ok(())
    }
}
