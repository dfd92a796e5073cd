//! Boosted cascade of Haar-like decision stumps (Viola–Jones).
//!
//! A cascade is a sequence of stages; each stage sums the votes of its stumps
//! and rejects the window as soon as the sum falls below the stage threshold.
//! Feature values are rectangle mean differences divided by the window's
//! standard deviation, so thresholds hold at every scale and exposure.

use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Windows flatter than this standard deviation are normalized by 1.0 instead.
const MIN_WINDOW_STD: f64 = 1.0;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}; set LINEUP_CASCADE or place it in the data directory")]
    NotFound(String),
    #[error("reading cascade: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing cascade: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid cascade: {0}")]
    Invalid(String),
}

/// One weighted rectangle of a Haar-like feature, in window coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

/// Single-split weak classifier over one Haar-like feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stump {
    pub rects: Vec<WeightedRect>,
    pub threshold: f32,
    /// Vote when the feature value is below `threshold`.
    pub left: f32,
    /// Vote otherwise.
    pub right: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub threshold: f32,
    pub stumps: Vec<Stump>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaarCascade {
    pub window_width: u32,
    pub window_height: u32,
    pub stages: Vec<Stage>,
}

impl HaarCascade {
    /// Load a cascade from its JSON representation on disk.
    pub fn load(path: &Path) -> Result<Self, CascadeError> {
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }

        let text = std::fs::read_to_string(path)?;
        let cascade: HaarCascade = serde_json::from_str(&text)?;
        cascade.validate()?;

        tracing::info!(
            path = %path.display(),
            window = ?(cascade.window_width, cascade.window_height),
            stages = cascade.stages.len(),
            stumps = cascade.stages.iter().map(|s| s.stumps.len()).sum::<usize>(),
            "loaded Haar cascade"
        );

        Ok(cascade)
    }

    /// Check structural invariants: a non-empty window, at least one stage,
    /// and every feature rectangle non-empty and inside the window.
    pub fn validate(&self) -> Result<(), CascadeError> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err(CascadeError::Invalid("window size must be non-zero".into()));
        }
        if self.stages.is_empty() {
            return Err(CascadeError::Invalid("cascade has no stages".into()));
        }

        for (si, stage) in self.stages.iter().enumerate() {
            if stage.stumps.is_empty() {
                return Err(CascadeError::Invalid(format!("stage {si} has no stumps")));
            }
            for (fi, stump) in stage.stumps.iter().enumerate() {
                if stump.rects.is_empty() {
                    return Err(CascadeError::Invalid(format!(
                        "stage {si} stump {fi} has no rectangles"
                    )));
                }
                for r in &stump.rects {
                    let inside = r.width > 0
                        && r.height > 0
                        && r.x + r.width <= self.window_width
                        && r.y + r.height <= self.window_height;
                    if !inside {
                        return Err(CascadeError::Invalid(format!(
                            "stage {si} stump {fi}: rectangle {r:?} outside {}x{} window",
                            self.window_width, self.window_height
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Window size in pixels at the given scale.
    pub fn scaled_window(&self, scale: f32) -> (u32, u32) {
        (
            (self.window_width as f32 * scale).round() as u32,
            (self.window_height as f32 * scale).round() as u32,
        )
    }

    /// Run every stage on the window whose top-left corner is (`x`, `y`).
    ///
    /// The caller guarantees the scaled window lies inside the integral image.
    pub fn evaluate(&self, integral: &IntegralImage, x: u32, y: u32, scale: f32) -> bool {
        let (win_w, win_h) = self.scaled_window(scale);
        let area = (win_w as f64) * (win_h as f64);
        if area == 0.0 {
            return false;
        }

        let mean = integral.sum(x, y, win_w, win_h) as f64 / area;
        let variance = integral.sq_sum(x, y, win_w, win_h) as f64 / area - mean * mean;
        let std = variance.max(0.0).sqrt().max(MIN_WINDOW_STD);

        for stage in &self.stages {
            let mut stage_sum = 0.0f32;
            for stump in &stage.stumps {
                let value = feature_value(stump, integral, x, y, win_w, win_h, scale) / std;
                stage_sum += if value < stump.threshold as f64 { stump.left } else { stump.right };
            }
            if stage_sum < stage.threshold {
                return false;
            }
        }
        true
    }
}

/// Weighted sum of rectangle means for one stump, in raw intensity units.
fn feature_value(
    stump: &Stump,
    integral: &IntegralImage,
    ox: u32,
    oy: u32,
    win_w: u32,
    win_h: u32,
    scale: f32,
) -> f64 {
    let mut value = 0.0f64;
    for r in &stump.rects {
        let rx = (r.x as f32 * scale).round() as u32;
        let ry = (r.y as f32 * scale).round() as u32;
        let rx = rx.min(win_w - 1);
        let ry = ry.min(win_h - 1);
        let rw = ((r.width as f32 * scale).round() as u32).clamp(1, win_w - rx);
        let rh = ((r.height as f32 * scale).round() as u32).clamp(1, win_h - ry);

        let sum = integral.sum(ox + rx, oy + ry, rw, rh) as f64;
        value += r.weight as f64 * sum / (rw as f64 * rh as f64);
    }
    value
}

/// Summed-area tables of pixel values and squared pixel values.
pub struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl IntegralImage {
    pub fn new(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let (w, h) = (width as usize, height as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sq_sum = vec![0u64; stride * (h + 1)];
        let raw = image.as_raw();

        for y in 0..h {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let p = raw[y * w + x] as u64;
                row_sum += p;
                row_sq += p * p;
                let idx = (y + 1) * stride + (x + 1);
                sum[idx] = sum[idx - stride] + row_sum;
                sq_sum[idx] = sq_sum[idx - stride] + row_sq;
            }
        }

        Self { stride, sum, sq_sum }
    }

    /// Sum of pixels in the rectangle starting at (`x`, `y`).
    pub fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    /// Sum of squared pixels in the rectangle starting at (`x`, `y`).
    pub fn sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sq_sum, self.stride, x, y, w, h)
    }

    fn rect(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        table[y1 * stride + x1] + table[y0 * stride + x0] - table[y1 * stride + x0] - table[y0 * stride + x1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::io::Write;

    /// 8×8 cascade with one stump: top half darker than bottom half.
    fn band_cascade() -> HaarCascade {
        HaarCascade {
            window_width: 8,
            window_height: 8,
            stages: vec![Stage {
                threshold: 0.0,
                stumps: vec![Stump {
                    rects: vec![
                        WeightedRect { x: 0, y: 0, width: 8, height: 4, weight: -1.0 },
                        WeightedRect { x: 0, y: 4, width: 8, height: 4, weight: 1.0 },
                    ],
                    threshold: 0.5,
                    left: -1.0,
                    right: 1.0,
                }],
            }],
        }
    }

    #[test]
    fn test_integral_sums() {
        let img = GrayImage::from_fn(4, 3, |x, y| Luma([(x + y * 4) as u8]));
        let ii = IntegralImage::new(&img);
        assert_eq!(ii.sum(0, 0, 4, 3), (0..12).sum::<u64>());
        assert_eq!(ii.sum(1, 1, 2, 2), 5 + 6 + 9 + 10);
        assert_eq!(ii.sq_sum(3, 2, 1, 1), 121);
    }

    #[test]
    fn test_evaluate_accepts_dark_over_bright() {
        let img = GrayImage::from_fn(16, 16, |_, y| Luma([if y < 8 { 30 } else { 220 }]));
        let ii = IntegralImage::new(&img);
        let cascade = band_cascade();
        assert!(cascade.evaluate(&ii, 0, 0, 2.0));
        assert!(cascade.evaluate(&ii, 4, 4, 1.0));
    }

    #[test]
    fn test_evaluate_rejects_inverted_contrast() {
        let img = GrayImage::from_fn(16, 16, |_, y| Luma([if y < 8 { 220 } else { 30 }]));
        let ii = IntegralImage::new(&img);
        assert!(!band_cascade().evaluate(&ii, 0, 0, 2.0));
    }

    #[test]
    fn test_evaluate_rejects_flat_window() {
        let img = GrayImage::from_pixel(16, 16, Luma([128]));
        let ii = IntegralImage::new(&img);
        assert!(!band_cascade().evaluate(&ii, 4, 4, 1.0));
    }

    #[test]
    fn test_validate_rejects_rect_outside_window() {
        let mut cascade = band_cascade();
        cascade.stages[0].stumps[0].rects[1].y = 6;
        assert!(matches!(cascade.validate(), Err(CascadeError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty() {
        let cascade = HaarCascade { window_width: 8, window_height: 8, stages: vec![] };
        assert!(cascade.validate().is_err());
    }

    #[test]
    fn test_load_roundtrip_from_disk() {
        let cascade = band_cascade();
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(serde_json::to_string(&cascade).expect("json").as_bytes())
            .expect("write");
        let loaded = HaarCascade::load(file.path()).expect("load");
        assert_eq!(loaded, cascade);
    }

    #[test]
    fn test_load_missing_file() {
        let err = HaarCascade::load(Path::new("/nonexistent/lineup/cascade.json")).unwrap_err();
        assert!(matches!(err, CascadeError::NotFound(_)));
    }
}
