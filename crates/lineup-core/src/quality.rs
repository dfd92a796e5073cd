//! Accept/reject heuristics for located faces on the screening path.

use crate::imaging;
use crate::types::FaceRect;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub min_face_size: u32,
    /// Lower bound for both width/height and height/width.
    pub min_aspect_ratio: f64,
    pub min_brightness: f64,
    pub max_brightness: f64,
    /// Minimum intensity standard deviation.
    pub min_contrast: f64,
    /// Minimum variance of the Laplacian response.
    pub min_sharpness: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_face_size: 40,
            min_aspect_ratio: 0.5,
            min_brightness: 30.0,
            max_brightness: 250.0,
            min_contrast: 10.0,
            min_sharpness: 50.0,
        }
    }
}

/// The first check a face region failed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Rejection {
    #[error("region lies outside the image")]
    OutOfBounds,
    #[error("face too small ({width}x{height})")]
    TooSmall { width: u32, height: u32 },
    #[error("aspect ratio {ratio:.2} out of range")]
    Aspect { ratio: f64 },
    #[error("mean brightness {mean:.1} out of range")]
    Brightness { mean: f64 },
    #[error("contrast {std:.1} too low")]
    Contrast { std: f64 },
    #[error("sharpness {variance:.1} too low")]
    Blurry { variance: f64 },
}

#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    thresholds: QualityThresholds,
}

impl QualityGate {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self { thresholds }
    }

    pub fn is_acceptable(&self, image: &GrayImage, rect: &FaceRect) -> bool {
        self.assess(image, rect).is_ok()
    }

    /// Run the checks in order (size, aspect, brightness, contrast,
    /// sharpness) and stop at the first failure.
    pub fn assess(&self, image: &GrayImage, rect: &FaceRect) -> Result<(), Rejection> {
        let t = &self.thresholds;

        if rect.width < t.min_face_size || rect.height < t.min_face_size {
            return Err(Rejection::TooSmall { width: rect.width, height: rect.height });
        }

        let ratio = rect.width as f64 / rect.height as f64;
        if ratio < t.min_aspect_ratio || 1.0 / ratio < t.min_aspect_ratio {
            return Err(Rejection::Aspect { ratio });
        }

        let region = imaging::crop_gray(image, rect).ok_or(Rejection::OutOfBounds)?;

        let (mean, std) = imaging::mean_std(region.as_raw());
        if mean < t.min_brightness || mean > t.max_brightness {
            return Err(Rejection::Brightness { mean });
        }
        if std < t.min_contrast {
            return Err(Rejection::Contrast { std });
        }

        let variance = imaging::laplacian_variance(region.as_raw(), rect.width as usize, rect.height as usize);
        if variance < t.min_sharpness {
            return Err(Rejection::Blurry { variance });
        }

        Ok(())
    }
}
