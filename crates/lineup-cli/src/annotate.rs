use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use lineup_core::{FaceRect, ScreenedFace};

const ACCEPTED: Rgb<u8> = Rgb([0, 255, 0]);
const REJECTED: Rgb<u8> = Rgb([255, 0, 0]);

/// Outline every screened face: green when acceptable, red otherwise.
pub fn outline_faces(image: &mut RgbImage, faces: &[ScreenedFace], thickness: u32) {
    for face in faces {
        let color = if face.acceptable() { ACCEPTED } else { REJECTED };
        outline(image, &face.rect, color, thickness);
    }
}

/// Hollow box `thickness` pixels wide, growing inward from the face edge.
fn outline(image: &mut RgbImage, face: &FaceRect, color: Rgb<u8>, thickness: u32) {
    for inset in 0..thickness.max(1) {
        let width = face.width.saturating_sub(2 * inset);
        let height = face.height.saturating_sub(2 * inset);
        if width == 0 || height == 0 {
            break;
        }
        let rect = Rect::at((face.x + inset) as i32, (face.y + inset) as i32).of_size(width, height);
        draw_hollow_rect_mut(image, rect, color);
    }
}
