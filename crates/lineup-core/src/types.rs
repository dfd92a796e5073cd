use crate::gallery::GalleryRecord;
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Axis-aligned face rectangle in integer pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Clip the rectangle to an image of `width` × `height`.
    ///
    /// Returns `None` when nothing of the rectangle remains inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceRect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(FaceRect::new(self.x, self.y, w, h))
    }

    /// True when the rectangle is non-empty and lies fully inside the image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0 && self.height > 0 && self.right() <= width && self.bottom() <= height
    }
}

/// Fixed-size, contrast-normalized single-channel face crop.
///
/// Only the canonicalizer constructs these; the pixels are immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalFace {
    pixels: GrayImage,
}

impl CanonicalFace {
    pub(crate) fn new(pixels: GrayImage) -> Self {
        Self { pixels }
    }

    pub fn image(&self) -> &GrayImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn as_raw(&self) -> &[u8] {
        self.pixels.as_raw()
    }
}

/// A gallery record that matched a probe, with its similarity in [0, 1].
#[derive(Debug, Clone, Serialize)]
pub struct RecordMatch {
    pub record: GalleryRecord,
    pub score: f64,
}

/// Matches for one probe image, best first.
///
/// Only records scoring strictly above the engine threshold appear. Ties keep
/// gallery iteration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchResult {
    pub matches: Vec<RecordMatch>,
}

impl MatchResult {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn best(&self) -> Option<&RecordMatch> {
        self.matches.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordMatch> {
        self.matches.iter()
    }

    /// Consume the result, keeping only the matched records in rank order.
    pub fn into_records(self) -> Vec<GalleryRecord> {
        self.matches.into_iter().map(|m| m.record).collect()
    }
}
