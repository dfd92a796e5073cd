//! Similarity between two canonical faces.
//!
//! The score is the mean of a global structural-similarity index and the
//! zero-mean normalized cross-correlation of the two crops, clamped to [0, 1].
//! Both metrics are symmetric in their operands.
//!
//! Correlation is undefined when either crop has no variance. Such a pair
//! scores 0 outright rather than keeping half of its structural similarity,
//! so a flat crop can never clear a match threshold.

use crate::imaging;
use crate::types::CanonicalFace;
use std::borrow::Cow;

const DYNAMIC_RANGE: f64 = 255.0;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;

/// First and second moments of a pair of equally sized planes.
struct PairMoments {
    mean_a: f64,
    mean_b: f64,
    var_a: f64,
    var_b: f64,
    covariance: f64,
}

impl PairMoments {
    fn of(a: &[u8], b: &[u8]) -> Option<Self> {
        if a.is_empty() || a.len() != b.len() {
            return None;
        }

        let n = a.len() as f64;
        let (mut sa, mut sb, mut saa, mut sbb, mut sab) = (0.0f64, 0.0f64, 0.0f64, 0.0f64, 0.0f64);
        for (&pa, &pb) in a.iter().zip(b.iter()) {
            let (x, y) = (pa as f64, pb as f64);
            sa += x;
            sb += y;
            saa += x * x;
            sbb += y * y;
            sab += x * y;
        }

        let mean_a = sa / n;
        let mean_b = sb / n;
        Some(Self {
            mean_a,
            mean_b,
            var_a: (saa / n - mean_a * mean_a).max(0.0),
            var_b: (sbb / n - mean_b * mean_b).max(0.0),
            covariance: sab / n - mean_a * mean_b,
        })
    }
}

/// Global structural similarity of two equally sized planes, clamped to [0, 1].
pub fn ssim(a: &[u8], b: &[u8]) -> Option<f64> {
    let m = PairMoments::of(a, b)?;
    let c1 = (SSIM_K1 * DYNAMIC_RANGE).powi(2);
    let c2 = (SSIM_K2 * DYNAMIC_RANGE).powi(2);

    let numerator = (2.0 * m.mean_a * m.mean_b + c1) * (2.0 * m.covariance + c2);
    let denominator = (m.mean_a.powi(2) + m.mean_b.powi(2) + c1) * (m.var_a + m.var_b + c2);
    let value = numerator / denominator;

    value.is_finite().then(|| value.clamp(0.0, 1.0))
}

/// Zero-mean normalized cross-correlation in [-1, 1].
///
/// The operands have equal size, so the template search has exactly one
/// placement. `None` when either plane has no variance.
pub fn correlation(a: &[u8], b: &[u8]) -> Option<f64> {
    let m = PairMoments::of(a, b)?;
    let denom = (m.var_a * m.var_b).sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    let value = m.covariance / denom;
    value.is_finite().then(|| value.clamp(-1.0, 1.0))
}

/// Similarity of two canonical faces in [0, 1].
///
/// When sizes differ, `b` is resized to `a`'s dimensions first. Any numeric
/// failure, including a crop without variance, scores 0.
pub fn score(a: &CanonicalFace, b: &CanonicalFace) -> f64 {
    let b_pixels = if (a.width(), a.height()) == (b.width(), b.height()) {
        Cow::Borrowed(b.image())
    } else {
        Cow::Owned(imaging::resize_gray(b.image(), a.width(), a.height()))
    };

    let (a_raw, b_raw) = (a.as_raw(), b_pixels.as_raw().as_slice());
    match (ssim(a_raw, b_raw), correlation(a_raw, b_raw)) {
        (Some(s), Some(c)) => ((s + c) / 2.0).clamp(0.0, 1.0),
        (s, c) => {
            tracing::debug!(ssim = ?s, correlation = ?c, "similarity undefined, scoring 0");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn face_from(size: u32, data: Vec<u8>) -> CanonicalFace {
        CanonicalFace::new(GrayImage::from_raw(size, size, data).expect("buffer size"))
    }

    fn random_face(rng: &mut StdRng, size: u32) -> CanonicalFace {
        let data = (0..size * size).map(|_| rng.gen::<u8>()).collect();
        face_from(size, data)
    }

    #[test]
    fn test_self_similarity_saturates() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let a = random_face(&mut rng, 32);
            assert!((score(&a, &a) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_symmetric() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..20 {
            let a = random_face(&mut rng, 24);
            let b = random_face(&mut rng, 24);
            assert!((score(&a, &b) - score(&b, &a)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bounded_for_random_pairs() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let a = random_face(&mut rng, 16);
            let b = random_face(&mut rng, 16);
            let s = score(&a, &b);
            assert!((0.0..=1.0).contains(&s), "score {s} out of range");
        }
    }

    #[test]
    fn test_inverted_image_scores_low() {
        let data: Vec<u8> = (0..64u32 * 64).map(|i| ((i * 37) % 251) as u8).collect();
        let inverted: Vec<u8> = data.iter().map(|p| 255 - p).collect();
        let a = face_from(64, data);
        let b = face_from(64, inverted);
        assert!(score(&a, &b) < 0.1);
    }

    #[test]
    fn test_flat_face_scores_zero() {
        let flat = face_from(16, vec![128; 256]);
        let mut rng = StdRng::seed_from_u64(3);
        let other = random_face(&mut rng, 16);
        assert_eq!(score(&flat, &other), 0.0);
        assert_eq!(score(&flat, &flat), 0.0);
    }

    #[test]
    fn test_size_mismatch_resizes() {
        let big = CanonicalFace::new(GrayImage::from_fn(64, 64, |x, _| Luma([(x * 4) as u8])));
        let small = CanonicalFace::new(GrayImage::from_fn(32, 32, |x, _| Luma([(x * 8) as u8])));
        let s = score(&big, &small);
        assert!(s > 0.9, "resized gradient should still match, got {s}");
    }

    #[test]
    fn test_ssim_length_mismatch() {
        assert!(ssim(&[1, 2, 3], &[1, 2]).is_none());
        assert!(correlation(&[], &[]).is_none());
    }
}
