//! Face canonicalization: crop, resize, grayscale, equalize, smooth.
//!
//! Probe and gallery faces go through the same steps so that two crops of the
//! same face produce the same representation.

use crate::imaging::{self, BilateralParams};
use crate::types::{CanonicalFace, FaceRect};
use image::RgbImage;

pub const DEFAULT_CANONICAL_SIZE: u32 = 150;

/// Turns a located face region into a [`CanonicalFace`].
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    size: u32,
    smoothing: Option<BilateralParams>,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new(DEFAULT_CANONICAL_SIZE, Some(BilateralParams::default()))
    }
}

impl Canonicalizer {
    pub fn new(size: u32, smoothing: Option<BilateralParams>) -> Self {
        Self { size: size.max(1), smoothing }
    }

    /// Side length of the square output.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Crop `rect` out of `image` and normalize it.
    ///
    /// Returns `None` for a zero-area rectangle or one that leaves the image.
    pub fn canonicalize(&self, image: &RgbImage, rect: &FaceRect) -> Option<CanonicalFace> {
        let Some(crop) = imaging::crop_rgb(image, rect) else {
            tracing::debug!(?rect, width = image.width(), height = image.height(), "degenerate face crop");
            return None;
        };

        let resized = imaging::resize_rgb(&crop, self.size, self.size);
        let mut gray = imaging::to_gray(&resized);
        imaging::equalize_histogram(&mut gray);

        let face = match &self.smoothing {
            Some(params) => imaging::bilateral_filter(&gray, params),
            None => gray,
        };

        Some(CanonicalFace::new(face))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let v = ((x * 7 + y * 3) % 200) as u8 + 30;
            Rgb([v, v / 2, 255 - v])
        })
    }

    #[test]
    fn test_output_is_fixed_size() {
        let canon = Canonicalizer::new(64, None);
        let face = canon
            .canonicalize(&gradient(300, 200), &FaceRect::new(10, 20, 123, 77))
            .expect("face");
        assert_eq!((face.width(), face.height()), (64, 64));
    }

    #[test]
    fn test_output_is_equalized() {
        let canon = Canonicalizer::new(32, None);
        let face = canon
            .canonicalize(&gradient(100, 100), &FaceRect::new(0, 0, 100, 100))
            .expect("face");
        let raw = face.as_raw();
        assert_eq!(raw.iter().copied().min(), Some(0));
        assert_eq!(raw.iter().copied().max(), Some(255));
    }

    #[test]
    fn test_degenerate_rect_is_absent() {
        let canon = Canonicalizer::default();
        let img = gradient(50, 50);
        assert!(canon.canonicalize(&img, &FaceRect::new(0, 0, 0, 10)).is_none());
        assert!(canon.canonicalize(&img, &FaceRect::new(40, 40, 20, 20)).is_none());
    }

    #[test]
    fn test_deterministic() {
        let canon = Canonicalizer::default();
        let img = gradient(200, 200);
        let rect = FaceRect::new(30, 30, 120, 120);
        let a = canon.canonicalize(&img, &rect).expect("a");
        let b = canon.canonicalize(&img, &rect).expect("b");
        assert_eq!(a.as_raw(), b.as_raw());
    }
}
