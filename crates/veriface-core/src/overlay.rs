//! Draw a detected face's box and landmarks onto an image.

use crate::types::{FaceBox, FaceDescriptorRecord};
use image::{DynamicImage, Rgb, RgbImage};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LANDMARK_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: i64 = 3;
const LANDMARK_RADIUS: i64 = 2;

/// Return a copy of `image` with the face box outlined and every landmark
/// marked with a small dot. The input is not modified.
pub fn draw_detection(image: &DynamicImage, face: &FaceDescriptorRecord) -> RgbImage {
    let mut canvas = image.to_rgb8();
    stroke_rect(&mut canvas, &face.bbox);
    for p in &face.landmarks {
        fill_disc(&mut canvas, p.x.round() as i64, p.y.round() as i64);
    }
    canvas
}

fn put(canvas: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < canvas.width() && (y as u32) < canvas.height() {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}

fn stroke_rect(canvas: &mut RgbImage, bbox: &FaceBox) {
    let x0 = bbox.x.round() as i64;
    let y0 = bbox.y.round() as i64;
    let x1 = bbox.right().round() as i64;
    let y1 = bbox.bottom().round() as i64;
    for t in 0..BOX_THICKNESS {
        for x in x0..=x1 {
            put(canvas, x, y0 + t, BOX_COLOR);
            put(canvas, x, y1 - t, BOX_COLOR);
        }
        for y in y0..=y1 {
            put(canvas, x0 + t, y, BOX_COLOR);
            put(canvas, x1 - t, y, BOX_COLOR);
        }
    }
}

fn fill_disc(canvas: &mut RgbImage, cx: i64, cy: i64) {
    let r = LANDMARK_RADIUS;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                put(canvas, cx + dx, cy + dy, LANDMARK_COLOR);
            }
        }
    }
}
