//! Multi-scale sliding-window face location over a Haar cascade.
//!
//! The cascade window grows by `scale_factor` per level; every position on a
//! scale-dependent stride is classified, and raw hits are merged by neighbour
//! grouping so only regions confirmed by several overlapping windows survive.

use crate::cascade::{CascadeError, HaarCascade, IntegralImage};
use crate::types::FaceRect;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Relative tolerance when deciding two hits describe the same face.
const GROUP_EPS: f32 = 0.2;
/// Smallest growth per scale level accepted from configuration.
const MIN_SCALE_FACTOR: f32 = 1.01;

#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
}

/// Search parameters for the sliding-window detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorParams {
    /// Window growth between consecutive scales.
    pub scale_factor: f32,
    /// Overlapping hits a region needs beyond the first before it is reported.
    pub min_neighbors: u32,
    /// Windows smaller than this many pixels on either side are not tried.
    pub min_size: u32,
}

impl Default for LocatorParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.05,
            min_neighbors: 4,
            min_size: 80,
        }
    }
}

/// Finds candidate face rectangles in a grayscale image.
pub trait FaceLocator: Send + Sync {
    /// Returns zero or more rectangles, each fully inside the image.
    ///
    /// Finding nothing is `Ok(vec![])`; only an empty image is an error.
    fn locate(&self, image: &GrayImage) -> Result<Vec<FaceRect>, LocatorError>;
}

/// Cascade-backed face locator.
pub struct CascadeLocator {
    cascade: HaarCascade,
    params: LocatorParams,
}

impl CascadeLocator {
    pub fn new(cascade: HaarCascade, mut params: LocatorParams) -> Self {
        if !params.scale_factor.is_finite() {
            let fallback = LocatorParams::default().scale_factor;
            tracing::warn!(
                requested = params.scale_factor,
                using = fallback,
                "scale factor not finite, using default"
            );
            params.scale_factor = fallback;
        } else if params.scale_factor < MIN_SCALE_FACTOR {
            tracing::warn!(
                requested = params.scale_factor,
                using = MIN_SCALE_FACTOR,
                "scale factor too small, clamping"
            );
            params.scale_factor = MIN_SCALE_FACTOR;
        }
        Self { cascade, params }
    }

    /// Load the cascade file and build a locator around it.
    pub fn load(path: &Path, params: LocatorParams) -> Result<Self, CascadeError> {
        Ok(Self::new(HaarCascade::load(path)?, params))
    }

    pub fn params(&self) -> &LocatorParams {
        &self.params
    }

    /// Every window the cascade accepts, before grouping.
    fn scan(&self, image: &GrayImage) -> Vec<FaceRect> {
        let integral = IntegralImage::new(image);
        let (img_w, img_h) = image.dimensions();
        let mut hits = Vec::new();
        let mut scales_tried = 0usize;

        let mut scale = 1.0f32;
        loop {
            let (win_w, win_h) = self.cascade.scaled_window(scale);
            if win_w > img_w || win_h > img_h {
                break;
            }

            if win_w >= self.params.min_size && win_h >= self.params.min_size {
                scales_tried += 1;
                // Two-pixel stride in scaled space for small scales, one beyond.
                let stride = if scale > 2.0 { scale } else { 2.0 * scale };
                let step = (stride.round() as u32).max(1) as usize;

                for y in (0..=img_h - win_h).step_by(step) {
                    for x in (0..=img_w - win_w).step_by(step) {
                        if self.cascade.evaluate(&integral, x, y, scale) {
                            hits.push(FaceRect::new(x, y, win_w, win_h));
                        }
                    }
                }
            }

            scale *= self.params.scale_factor;
        }

        tracing::debug!(scales = scales_tried, hits = hits.len(), "cascade scan complete");
        hits
    }
}

impl FaceLocator for CascadeLocator {
    fn locate(&self, image: &GrayImage) -> Result<Vec<FaceRect>, LocatorError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(LocatorError::EmptyImage { width, height });
        }

        let hits = self.scan(image);
        let faces: Vec<FaceRect> = group_rectangles(&hits, self.params.min_neighbors, GROUP_EPS)
            .into_iter()
            .filter_map(|r| r.clamp_to(width, height))
            .collect();

        tracing::debug!(raw = hits.len(), faces = faces.len(), "located faces");
        Ok(faces)
    }
}

/// Whether two hits are close enough in position and size to be one face.
fn similar(a: &FaceRect, b: &FaceRect, eps: f32) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f32 * 0.5;
    let close = |p: u32, q: u32| (p as f32 - q as f32).abs() <= delta;
    close(a.x, b.x) && close(a.y, b.y) && close(a.right(), b.right()) && close(a.bottom(), b.bottom())
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Merge overlapping hits into averaged rectangles.
///
/// Hits are clustered transitively by [`similar`]. A cluster survives when it
/// holds more than `min_neighbors` hits and is not nested inside a stronger
/// cluster. With `min_neighbors == 0` the raw hits are returned unchanged.
pub fn group_rectangles(rects: &[FaceRect], min_neighbors: u32, eps: f32) -> Vec<FaceRect> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let mut parent: Vec<usize> = (0..rects.len()).collect();
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find_root(&mut parent, i), find_root(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // Accumulate per cluster, numbered in order of first appearance.
    let mut cluster_of_root: Vec<Option<usize>> = vec![None; rects.len()];
    let mut sums: Vec<[u64; 4]> = Vec::new();
    let mut counts: Vec<u32> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find_root(&mut parent, i);
        let cluster = *cluster_of_root[root].get_or_insert_with(|| {
            sums.push([0; 4]);
            counts.push(0);
            counts.len() - 1
        });
        let s = &mut sums[cluster];
        s[0] += r.x as u64;
        s[1] += r.y as u64;
        s[2] += r.width as u64;
        s[3] += r.height as u64;
        counts[cluster] += 1;
    }

    let averaged: Vec<FaceRect> = sums
        .iter()
        .zip(counts.iter())
        .map(|(s, &n)| {
            let avg = |v: u64| (v as f64 / n as f64).round() as u32;
            FaceRect::new(avg(s[0]), avg(s[1]), avg(s[2]), avg(s[3]))
        })
        .collect();

    let mut kept = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }

        let swallowed = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f32 * eps).round() as i64;
            let dy = (r2.height as f32 * eps).round() as i64;
            let inside = r1.x as i64 >= r2.x as i64 - dx
                && r1.y as i64 >= r2.y as i64 - dy
                && r1.right() as i64 <= r2.right() as i64 + dx
                && r1.bottom() as i64 <= r2.bottom() as i64 + dy;
            inside && (n2 > n1.max(3) || n1 < 3)
        });

        if !swallowed {
            kept.push(*r1);
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::{Stage, Stump, WeightedRect};
    use image::Luma;

    /// 12×12 window: a dark band across rows 3..6 above a bright band at 6..9.
    fn brow_cascade() -> HaarCascade {
        HaarCascade {
            window_width: 12,
            window_height: 12,
            stages: vec![Stage {
                threshold: 0.0,
                stumps: vec![Stump {
                    rects: vec![
                        WeightedRect { x: 1, y: 3, width: 10, height: 3, weight: -1.0 },
                        WeightedRect { x: 1, y: 6, width: 10, height: 3, weight: 1.0 },
                    ],
                    threshold: 1.0,
                    left: -1.0,
                    right: 1.0,
                }],
            }],
        }
    }

    /// Gray canvas with a 48×48 pattern at (40, 30) matching `brow_cascade`.
    fn brow_scene() -> GrayImage {
        GrayImage::from_fn(160, 120, |x, y| {
            let inside = (40..88).contains(&x) && (30..78).contains(&y);
            if !inside {
                return Luma([110]);
            }
            let v = if (42..54).contains(&y) { 20 } else { 230 };
            Luma([v])
        })
    }

    fn params(min_neighbors: u32) -> LocatorParams {
        LocatorParams { scale_factor: 1.1, min_neighbors, min_size: 36 }
    }

    #[test]
    fn test_locates_pattern() {
        let locator = CascadeLocator::new(brow_cascade(), params(1));
        let faces = locator.locate(&brow_scene()).expect("locate");
        assert!(!faces.is_empty(), "expected at least one face");
        let hit = faces
            .iter()
            .find(|f| f.x < 64 && f.right() > 64 && f.y < 54 && f.bottom() > 54)
            .expect("a face covering the pattern centre");
        assert!(hit.width >= 36);
        for f in &faces {
            assert!(f.fits_within(160, 120));
        }
    }

    #[test]
    fn test_blank_image_yields_nothing() {
        let locator = CascadeLocator::new(brow_cascade(), params(1));
        let blank = GrayImage::from_pixel(160, 120, Luma([128]));
        assert!(locator.locate(&blank).expect("locate").is_empty());
    }

    #[test]
    fn test_empty_image_is_error() {
        let locator = CascadeLocator::new(brow_cascade(), params(1));
        let err = locator.locate(&GrayImage::new(0, 0)).unwrap_err();
        assert!(matches!(err, LocatorError::EmptyImage { .. }));
    }

    #[test]
    fn test_min_size_larger_than_image() {
        let mut p = params(1);
        p.min_size = 500;
        let locator = CascadeLocator::new(brow_cascade(), p);
        assert!(locator.locate(&brow_scene()).expect("locate").is_empty());
    }

    #[test]
    fn test_scale_factor_clamped() {
        let locator = CascadeLocator::new(
            brow_cascade(),
            LocatorParams { scale_factor: 1.0, min_neighbors: 1, min_size: 12 },
        );
        assert!(locator.params().scale_factor > 1.0);
    }

    #[test]
    fn test_non_finite_scale_factor_replaced() {
        for requested in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let locator = CascadeLocator::new(
                brow_cascade(),
                LocatorParams { scale_factor: requested, ..params(1) },
            );
            assert_eq!(locator.params().scale_factor, LocatorParams::default().scale_factor);

            // The scan must still terminate and find the pattern.
            let faces = locator.locate(&brow_scene()).expect("locate");
            assert!(!faces.is_empty(), "scale factor {requested}");
        }
    }

    #[test]
    fn test_group_merges_neighbours() {
        let rects = vec![
            FaceRect::new(100, 100, 50, 50),
            FaceRect::new(102, 98, 52, 52),
            FaceRect::new(98, 101, 48, 48),
            FaceRect::new(400, 400, 50, 50),
        ];
        let grouped = group_rectangles(&rects, 2, GROUP_EPS);
        assert_eq!(grouped, vec![FaceRect::new(100, 100, 50, 50)]);
    }

    #[test]
    fn test_group_drops_weak_clusters() {
        let rects = vec![FaceRect::new(0, 0, 30, 30), FaceRect::new(1, 1, 30, 30)];
        assert!(group_rectangles(&rects, 2, GROUP_EPS).is_empty());
        assert_eq!(group_rectangles(&rects, 1, GROUP_EPS).len(), 1);
    }

    #[test]
    fn test_group_zero_neighbours_passthrough() {
        let rects = vec![FaceRect::new(0, 0, 30, 30), FaceRect::new(1, 1, 30, 30)];
        assert_eq!(group_rectangles(&rects, 0, GROUP_EPS), rects);
    }

    #[test]
    fn test_group_removes_nested_weaker_cluster() {
        let mut rects = vec![FaceRect::new(0, 0, 100, 100); 6];
        rects.extend(vec![FaceRect::new(30, 30, 30, 30); 2]);
        let grouped = group_rectangles(&rects, 1, GROUP_EPS);
        assert_eq!(grouped, vec![FaceRect::new(0, 0, 100, 100)]);
    }

    #[test]
    fn test_similar_tolerance() {
        let a = FaceRect::new(0, 0, 100, 100);
        assert!(similar(&a, &FaceRect::new(20, 0, 100, 100), 0.2));
        assert!(!similar(&a, &FaceRect::new(21, 0, 100, 100), 0.2));
    }
}
