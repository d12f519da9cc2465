use crate::model_service::BoundingBox;
use image::{Rgb, RgbImage};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;

/// Outlines `bbox` on `frame`, clipped to the frame edges.
pub fn draw_box(frame: &mut RgbImage, bbox: &BoundingBox) {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let x1 = bbox.x1.min(width - 1);
    let x2 = bbox.x2.min(width - 1);
    let y1 = bbox.y1.min(height - 1);
    let y2 = bbox.y2.min(height - 1);
    if x1 > x2 || y1 > y2 {
        return;
    }

    for t in 0..BOX_THICKNESS {
        for x in x1..=x2 {
            put(frame, x, y1 + t);
            put(frame, x, y2.saturating_sub(t));
        }
        for y in y1..=y2 {
            put(frame, x1 + t, y);
            put(frame, x2.saturating_sub(t), y);
        }
    }
}

fn put(frame: &mut RgbImage, x: u32, y: u32) {
    if x < frame.width() && y < frame.height() {
        frame.put_pixel(x, y, BOX_COLOR);
    }
}
