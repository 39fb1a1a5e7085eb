//! Adaptive background model.
//!
//! Maintains an exponentially-weighted per-pixel luma estimate of the empty
//! scene. The first `warmup_frames` calls only seed the estimate; the
//! detector reports a warming-up marker for those frames and leaves history
//! untouched.

/// Exponentially-weighted per-pixel background estimate over luma frames.
pub struct BackgroundModel {
    mean: Vec<f32>,
    width: u32,
    height: u32,
    alpha: f32,
    seeded_frames: u32,
    warmup_frames: u32,
}

impl BackgroundModel {
    pub fn new(alpha: f32, warmup_frames: u32) -> Self {
        Self {
            mean: Vec::new(),
            width: 0,
            height: 0,
            alpha,
            seeded_frames: 0,
            warmup_frames,
        }
    }

    pub fn is_warming_up(&self) -> bool {
        self.seeded_frames < self.warmup_frames
    }

    pub fn frames_remaining(&self) -> u32 {
        self.warmup_frames.saturating_sub(self.seeded_frames)
    }

    /// True when the estimate matches the given frame dimensions.
    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    /// Absorb one luma frame into the estimate. A dimension change resets
    /// the model and restarts the seeding phase.
    pub fn update(&mut self, gray: &[u8], width: u32, height: u32) {
        if self.width != width || self.height != height || self.mean.len() != gray.len() {
            self.mean = gray.iter().map(|&v| v as f32).collect();
            self.width = width;
            self.height = height;
            self.seeded_frames = 1;
            return;
        }

        for (estimate, &observed) in self.mean.iter_mut().zip(gray) {
            *estimate += self.alpha * (observed as f32 - *estimate);
        }
        self.seeded_frames = self.seeded_frames.saturating_add(1);
    }

    /// Binary foreground mask: 255 where the luma deviates from the
    /// background estimate by more than `threshold`, 0 elsewhere.
    pub fn foreground_mask(&self, gray: &[u8], threshold: u8) -> Vec<u8> {
        self.mean
            .iter()
            .zip(gray)
            .map(|(&estimate, &observed)| {
                if (observed as f32 - estimate).abs() > threshold as f32 {
                    255
                } else {
                    0
                }
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.mean.clear();
        self.width = 0;
        self.height = 0;
        self.seeded_frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_counts_down_to_zero() {
        let mut model = BackgroundModel::new(0.05, 3);
        let gray = vec![10u8; 16];
        assert!(model.is_warming_up());

        model.update(&gray, 4, 4);
        model.update(&gray, 4, 4);
        assert!(model.is_warming_up());
        assert_eq!(model.frames_remaining(), 1);

        model.update(&gray, 4, 4);
        assert!(!model.is_warming_up());
    }

    #[test]
    fn mask_flags_deviating_pixels() {
        let mut model = BackgroundModel::new(0.05, 1);
        let background = vec![10u8; 16];
        model.update(&background, 4, 4);

        let mut scene = background.clone();
        scene[5] = 200;
        let mask = model.foreground_mask(&scene, 25);
        assert_eq!(mask[5], 255);
        assert_eq!(mask.iter().filter(|&&v| v == 255).count(), 1);
    }

    #[test]
    fn dimension_change_restarts_seeding() {
        let mut model = BackgroundModel::new(0.05, 2);
        model.update(&vec![10u8; 16], 4, 4);
        model.update(&vec![10u8; 16], 4, 4);
        assert!(!model.is_warming_up());

        model.update(&vec![10u8; 64], 8, 8);
        assert!(model.is_warming_up());
    }
}
