//! Frame annotation.
//!
//! Draws detection results onto a frame copy for the annotated variant of
//! the current-frame endpoint. Region bounding boxes are outlined in green,
//! component centroids are marked with a red dot.

use crate::capture::Frame;
use crate::detect::result::MovementEvent;

const BOX_THICKNESS: u32 = 2;
const CENTROID_RADIUS: i32 = 3;
const BOX_COLOR: [u8; 3] = [0, 255, 0];
const CENTROID_COLOR: [u8; 3] = [255, 0, 0];

/// Draw the event's regions onto the frame in place. A frame with no
/// detected regions is left untouched.
pub fn annotate_frame(frame: &mut Frame, event: &MovementEvent) {
    if !event.detected() || !frame.is_well_formed() {
        return;
    }
    let width = frame.width();
    let height = frame.height();

    for region in &event.regions {
        draw_rect(
            frame,
            region.x,
            region.y,
            region.width,
            region.height,
            width,
            height,
        );
        draw_dot(frame, region.centroid_x, region.centroid_y, width, height);
    }
}

fn put_pixel(frame: &mut Frame, x: u32, y: u32, width: u32, color: [u8; 3]) {
    let offset = ((y * width + x) * 3) as usize;
    frame.pixels_mut()[offset..offset + 3].copy_from_slice(&color);
}

fn draw_rect(frame: &mut Frame, x0: u32, y0: u32, w: u32, h: u32, width: u32, height: u32) {
    let x1 = (x0 + w).min(width);
    let y1 = (y0 + h).min(height);
    for t in 0..BOX_THICKNESS {
        // Horizontal edges.
        for x in x0..x1 {
            if y0 + t < height {
                put_pixel(frame, x, y0 + t, width, BOX_COLOR);
            }
            if y1 > t + 1 {
                put_pixel(frame, x, y1 - t - 1, width, BOX_COLOR);
            }
        }
        // Vertical edges.
        for y in y0..y1 {
            if x0 + t < width {
                put_pixel(frame, x0 + t, y, width, BOX_COLOR);
            }
            if x1 > t + 1 {
                put_pixel(frame, x1 - t - 1, y, width, BOX_COLOR);
            }
        }
    }
}

fn draw_dot(frame: &mut Frame, cx: u32, cy: u32, width: u32, height: u32) {
    for dy in -CENTROID_RADIUS..=CENTROID_RADIUS {
        for dx in -CENTROID_RADIUS..=CENTROID_RADIUS {
            if dx * dx + dy * dy > CENTROID_RADIUS * CENTROID_RADIUS {
                continue;
            }
            let x = cx as i64 + dx as i64;
            let y = cy as i64 + dy as i64;
            if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
                continue;
            }
            put_pixel(frame, x as u32, y as u32, width, CENTROID_COLOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::{DetectionMethod, MovementRegion};

    fn test_event(regions: Vec<MovementRegion>) -> MovementEvent {
        MovementEvent {
            timestamp_ms: 0,
            region_count: regions.len(),
            regions,
            total_area: 0,
            intensity: 0.0,
            frame_width: 64,
            frame_height: 64,
            method: DetectionMethod::AdaptiveBackground,
        }
    }

    #[test]
    fn annotation_draws_box_and_centroid() {
        let mut frame = Frame::new(vec![10u8; 64 * 64 * 3], 64, 64, 0);
        let event = test_event(vec![MovementRegion {
            x: 10,
            y: 10,
            width: 20,
            height: 20,
            area: 400,
            centroid_x: 20,
            centroid_y: 20,
        }]);
        annotate_frame(&mut frame, &event);

        // Top-left box corner is green.
        let corner = ((10 * 64 + 10) * 3) as usize;
        assert_eq!(&frame.pixels()[corner..corner + 3], &BOX_COLOR);
        // Centroid is red.
        let centroid = ((20 * 64 + 20) * 3) as usize;
        assert_eq!(&frame.pixels()[centroid..centroid + 3], &CENTROID_COLOR);
    }

    #[test]
    fn empty_event_leaves_frame_untouched() {
        let mut frame = Frame::new(vec![10u8; 64 * 64 * 3], 64, 64, 0);
        let before = frame.pixels().to_vec();
        annotate_frame(&mut frame, &test_event(vec![]));
        assert_eq!(frame.pixels(), &before[..]);
    }
}
