//! Display overlay for detection results.
//!
//! Pure drawing: nothing here feeds back into capture decisions.

use super::{FaceDetection, Rect};
use crate::core::frame::Frame;
use image::{Rgb, RgbImage};

const FACE_COLOR: Rgb<u8> = Rgb([74, 108, 212]);
const SMILE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const NO_SMILE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const FACE_THICKNESS: u32 = 3;
const SMILE_THICKNESS: u32 = 2;
const CORNER_LENGTH: u32 = 20;
const CORNER_THICKNESS: u32 = 5;
const STATUS_BAR_HEIGHT: u32 = 8;
const STATUS_BAR_GAP: u32 = 4;

/// Draw face boxes, corner markers, smile boxes and a per-face status bar.
///
/// The status bar sits above the face (below it when the face touches the
/// top edge) and is green for a smiling face, red otherwise.
pub fn annotate(mut frame: Frame, faces: &[FaceDetection]) -> Frame {
    let image = frame.as_image_mut();

    for face in faces {
        let bounds = face.bounds;
        draw_outline(image, bounds, FACE_COLOR, FACE_THICKNESS);
        draw_corners(image, bounds);

        for smile in &face.smiles {
            draw_outline(image, smile.offset(bounds.x, bounds.y), SMILE_COLOR, SMILE_THICKNESS);
        }

        let color = if face.is_smiling() { SMILE_COLOR } else { NO_SMILE_COLOR };
        let bar_y = if bounds.y >= STATUS_BAR_HEIGHT + STATUS_BAR_GAP {
            bounds.y - STATUS_BAR_HEIGHT - STATUS_BAR_GAP
        } else {
            bounds.y + bounds.height + STATUS_BAR_GAP
        };
        fill(image, Rect::new(bounds.x, bar_y, bounds.width, STATUS_BAR_HEIGHT), color);
    }

    frame
}

fn draw_outline(image: &mut RgbImage, rect: Rect, color: Rgb<u8>, thickness: u32) {
    let thickness = thickness.min(rect.width).min(rect.height);
    fill(image, Rect::new(rect.x, rect.y, rect.width, thickness), color);
    fill(image, Rect::new(rect.x, (rect.y + rect.height).saturating_sub(thickness), rect.width, thickness), color);
    fill(image, Rect::new(rect.x, rect.y, thickness, rect.height), color);
    fill(image, Rect::new((rect.x + rect.width).saturating_sub(thickness), rect.y, thickness, rect.height), color);
}

fn draw_corners(image: &mut RgbImage, rect: Rect) {
    let len = CORNER_LENGTH.min(rect.width).min(rect.height);
    let t = CORNER_THICKNESS.min(len);
    let right = (rect.x + rect.width).saturating_sub(len);
    let bottom = (rect.y + rect.height).saturating_sub(len);
    let right_edge = (rect.x + rect.width).saturating_sub(t);
    let bottom_edge = (rect.y + rect.height).saturating_sub(t);

    for (x, y) in [(rect.x, rect.y), (right, rect.y), (rect.x, bottom_edge), (right, bottom_edge)] {
        fill(image, Rect::new(x, y, len, t), FACE_COLOR);
    }
    for (x, y) in [(rect.x, rect.y), (right_edge, rect.y), (rect.x, bottom), (right_edge, bottom)] {
        fill(image, Rect::new(x, y, t, len), FACE_COLOR);
    }
}

fn fill(image: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    let Some(rect) = rect.clamp_to(image.width(), image.height()) else {
        return;
    };
    for y in rect.y..rect.y + rect.height {
        for x in rect.x..rect.x + rect.width {
            image.put_pixel(x, y, color);
        }
    }
}
