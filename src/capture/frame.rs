//! Decoded frame container and encoding helpers.
//!
//! Frames are ephemeral: they live in memory for the duration of one
//! processing cycle and are never persisted raw. Only derived artifacts
//! (movement events, analysis records) are stored, and only through the
//! encryption codec.

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

/// A decoded RGB frame captured from a camera source.
#[derive(Clone)]
pub struct Frame {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    timestamp_ms: u64,
}

impl Frame {
    /// Wrap a raw RGB8 pixel buffer. The buffer is validated lazily: a
    /// malformed frame is reported by the consumer (`detect`, `encode_jpeg`)
    /// rather than panicking here, so a bad capture never crashes the worker.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, timestamp_ms: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            timestamp_ms,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Total pixel count (not byte count).
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True when the buffer length matches the declared RGB8 dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == self.width as usize * self.height as usize * 3
    }

    /// Convert to a single-channel luma buffer (ITU-R BT.601 weights).
    pub fn to_gray(&self) -> Result<Vec<u8>> {
        if !self.is_well_formed() {
            return Err(anyhow!(
                "malformed frame: {} bytes for {}x{} RGB8",
                self.pixels.len(),
                self.width,
                self.height
            ));
        }
        let mut gray = Vec::with_capacity(self.pixels.len() / 3);
        for rgb in self.pixels.chunks_exact(3) {
            let luma =
                (299 * rgb[0] as u32 + 587 * rgb[1] as u32 + 114 * rgb[2] as u32) / 1000;
            gray.push(luma as u8);
        }
        Ok(gray)
    }

    /// Encode as JPEG at the given quality (1-100).
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        if !self.is_well_formed() {
            return Err(anyhow!(
                "malformed frame: {} bytes for {}x{} RGB8",
                self.pixels.len(),
                self.width,
                self.height
            ));
        }
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
        encoder.encode(
            &self.pixels,
            self.width,
            self.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_frame(width: u32, height: u32, value: u8) -> Frame {
        Frame::new(
            vec![value; (width * height * 3) as usize],
            width,
            height,
            0,
        )
    }

    #[test]
    fn gray_conversion_uses_luma_weights() {
        let mut pixels = vec![0u8; 3];
        pixels[0] = 255; // pure red
        let frame = Frame::new(pixels, 1, 1, 0);
        let gray = frame.to_gray().unwrap();
        assert_eq!(gray, vec![76]); // 255 * 299 / 1000
    }

    #[test]
    fn jpeg_encoding_produces_jpeg_magic() {
        let frame = uniform_frame(16, 16, 128);
        let jpeg = frame.encode_jpeg(85).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn malformed_frame_is_rejected() {
        let frame = Frame::new(vec![0u8; 10], 16, 16, 0);
        assert!(!frame.is_well_formed());
        assert!(frame.to_gray().is_err());
        assert!(frame.encode_jpeg(85).is_err());
    }
}
