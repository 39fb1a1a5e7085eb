//! Movement detector.
//!
//! Per-frame pipeline:
//! 1. Convert the frame to luma and diff it against the adaptive background
//!    model (`BackgroundModel`), thresholding into a binary foreground mask.
//! 2. Morphological open then close (3x3) to remove speckle noise.
//! 3. Extract connected components, discard those below `min_area`, and
//!    compute bounding box, area and centroid for the survivors.
//! 4. Intensity = surviving foreground area / frame area, as a percentage.
//!
//! The background model absorbs every frame, including the current one,
//! except during the initial seeding phase and on unusable frames. Events
//! with zero surviving regions are not historized so the activity history
//! stays meaningful.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::capture::Frame;
use crate::detect::background::BackgroundModel;
use crate::detect::result::{
    DetectionMethod, HistorySummary, MovementEvent, MovementOutcome, MovementRegion,
    MovementSummary,
};
use crate::lock_unpoisoned;

/// Detector tuning.
#[derive(Clone, Debug)]
pub struct DetectorConfig {
    /// Luma delta above which a pixel counts as foreground.
    pub sensitivity: u8,
    /// Minimum connected-component area (pixels) to survive filtering.
    pub min_area: u64,
    /// Background model learning rate.
    pub alpha: f32,
    /// Seeding frames before detection starts reporting.
    pub warmup_frames: u32,
    /// Ring-buffer capacity of the movement history.
    pub history_capacity: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: 25,
            min_area: 500,
            alpha: 0.05,
            warmup_frames: 5,
            history_capacity: 100,
        }
    }
}

/// Bounded, append-only ring of past movement summaries.
///
/// Invariants: length never exceeds capacity; only events with at least one
/// surviving region are recorded.
pub struct MovementHistory {
    entries: VecDeque<MovementSummary>,
    capacity: usize,
}

impl MovementHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, event: &MovementEvent) {
        if !event.detected() {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event.summary());
    }

    /// Most recent entries, oldest first, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<MovementSummary> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn summary(&self) -> HistorySummary {
        if self.entries.is_empty() {
            return HistorySummary::default();
        }
        let intensities: Vec<f64> = self.entries.iter().map(|e| e.intensity).collect();
        let sum: f64 = intensities.iter().sum();
        HistorySummary {
            total_detections: self.entries.len(),
            average_intensity: round2(sum / intensities.len() as f64),
            max_intensity: intensities.iter().cloned().fold(f64::MIN, f64::max),
            min_intensity: intensities.iter().cloned().fold(f64::MAX, f64::min),
            last_detection_ms: self.entries.back().map(|e| e.timestamp_ms),
        }
    }
}

/// Adaptive-background movement detector.
///
/// The background model is owned exclusively by the caller (the monitoring
/// worker); the history is shared behind a mutex so status queries can read
/// it from other execution contexts.
pub struct MovementDetector {
    config: DetectorConfig,
    background: BackgroundModel,
    history: Arc<Mutex<MovementHistory>>,
}

impl MovementDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let history = Arc::new(Mutex::new(MovementHistory::new(config.history_capacity)));
        Self::with_history(config, history)
    }

    pub fn with_history(config: DetectorConfig, history: Arc<Mutex<MovementHistory>>) -> Self {
        Self {
            background: BackgroundModel::new(config.alpha, config.warmup_frames),
            config,
            history,
        }
    }

    /// Shared handle to the history ring.
    pub fn history(&self) -> Arc<Mutex<MovementHistory>> {
        Arc::clone(&self.history)
    }

    /// Run one detection cycle. Never panics on bad input: an unusable frame
    /// yields `MovementOutcome::Error` and leaves detector state untouched.
    pub fn detect(&mut self, frame: &Frame) -> MovementOutcome {
        let gray = match frame.to_gray() {
            Ok(gray) => gray,
            Err(err) => {
                return MovementOutcome::Error {
                    reason: err.to_string(),
                }
            }
        };
        let (width, height) = (frame.width(), frame.height());

        if self.background.is_warming_up() || !self.background.matches(width, height) {
            self.background.update(&gray, width, height);
            return MovementOutcome::WarmingUp {
                frames_remaining: self.background.frames_remaining(),
            };
        }

        let mut mask = self.background.foreground_mask(&gray, self.config.sensitivity);
        self.background.update(&gray, width, height);

        morphological_open(&mut mask, width as usize, height as usize);
        morphological_close(&mut mask, width as usize, height as usize);

        let regions = extract_regions(&mask, width, height, self.config.min_area);
        let total_area: u64 = regions.iter().map(|r| r.area).sum();
        let intensity = round2(total_area as f64 / frame.pixel_count() as f64 * 100.0);

        let event = MovementEvent {
            timestamp_ms: frame.timestamp_ms(),
            region_count: regions.len(),
            regions,
            total_area,
            intensity,
            frame_width: width,
            frame_height: height,
            method: DetectionMethod::AdaptiveBackground,
        };

        if event.detected() {
            lock_unpoisoned(&self.history).record(&event);
            MovementOutcome::Detected(event)
        } else {
            MovementOutcome::NoMovement(event)
        }
    }

    /// Reset the background model and the history for a fresh session.
    pub fn reset(&mut self) {
        self.background.reset();
        lock_unpoisoned(&self.history).clear();
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ----------------------------------------------------------------------------
// Morphology (3x3 structuring element)
// ----------------------------------------------------------------------------

fn erode(mask: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = vec![0u8; mask.len()];
    for y in 0..height {
        for x in 0..width {
            let mut keep = true;
            'probe: for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                        keep = false;
                        break 'probe;
                    }
                    if mask[ny as usize * width + nx as usize] == 0 {
                        keep = false;
                        break 'probe;
                    }
                }
            }
            if keep {
                out[y * width + x] = 255;
            }
        }
    }
    out
}

fn dilate(mask: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = vec![0u8; mask.len()];
    for y in 0..height {
        for x in 0..width {
            'probe: for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                        continue;
                    }
                    if mask[ny as usize * width + nx as usize] != 0 {
                        out[y * width + x] = 255;
                        break 'probe;
                    }
                }
            }
        }
    }
    out
}

fn morphological_open(mask: &mut Vec<u8>, width: usize, height: usize) {
    let eroded = erode(mask, width, height);
    *mask = dilate(&eroded, width, height);
}

fn morphological_close(mask: &mut Vec<u8>, width: usize, height: usize) {
    let dilated = dilate(mask, width, height);
    *mask = erode(&dilated, width, height);
}

// ----------------------------------------------------------------------------
// Connected components (8-connectivity, iterative flood fill)
// ----------------------------------------------------------------------------

fn extract_regions(mask: &[u8], width: u32, height: u32, min_area: u64) -> Vec<MovementRegion> {
    let w = width as usize;
    let h = height as usize;
    let mut visited = vec![false; mask.len()];
    let mut regions = Vec::new();
    let mut stack: Vec<usize> = Vec::new();

    for start in 0..mask.len() {
        if mask[start] == 0 || visited[start] {
            continue;
        }

        let mut area = 0u64;
        let (mut min_x, mut min_y) = (w, h);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        let (mut sum_x, mut sum_y) = (0u64, 0u64);

        visited[start] = true;
        stack.push(start);
        while let Some(index) = stack.pop() {
            let x = index % w;
            let y = index / w;
            area += 1;
            sum_x += x as u64;
            sum_y += y as u64;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                        continue;
                    }
                    let neighbor = ny as usize * w + nx as usize;
                    if mask[neighbor] != 0 && !visited[neighbor] {
                        visited[neighbor] = true;
                        stack.push(neighbor);
                    }
                }
            }
        }

        if area < min_area {
            continue;
        }
        regions.push(MovementRegion {
            x: min_x as u32,
            y: min_y as u32,
            width: (max_x - min_x + 1) as u32,
            height: (max_y - min_y + 1) as u32,
            area,
            centroid_x: (sum_x / area) as u32,
            centroid_y: (sum_y / area) as u32,
        });
    }

    regions
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
