//! Match engine: probe image in, ranked gallery matches out.
//!
//! Request flow: load probe → enhance → locate faces → canonicalize each face
//! → score it against every gallery representation (cached per image path)
//! → keep the single best record above threshold per face → merge faces by
//! record → rank by descending score.

use crate::cache::RepresentationCache;
use crate::canonical::{Canonicalizer, DEFAULT_CANONICAL_SIZE};
use crate::gallery::{GalleryProvider, GalleryRecord};
use crate::imaging::{self, BilateralParams};
use crate::locator::{FaceLocator, LocatorError};
use crate::quality::{QualityGate, QualityThresholds, Rejection};
use crate::scorer;
use crate::types::{CanonicalFace, FaceRect, MatchResult, RecordMatch};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.75;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("cannot load image {}: {source}", path.display())]
    ProbeLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("locator error: {0}")]
    Locator(#[from] LocatorError),
}

/// Tunables for matching and screening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// A record matches only when its score is strictly greater than this.
    pub threshold: f64,
    /// Side length of canonical faces.
    pub canonical_size: u32,
    /// Apply edge-preserving smoothing to canonical faces.
    pub smooth: bool,
    pub bilateral: BilateralParams,
    /// Gaussian-blur images after luminance equalization, before locating.
    pub enhance_blur: bool,
    pub quality: QualityThresholds,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            canonical_size: DEFAULT_CANONICAL_SIZE,
            smooth: true,
            bilateral: BilateralParams::default(),
            enhance_blur: true,
            quality: QualityThresholds::default(),
        }
    }
}

/// A located face and its quality verdict.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenedFace {
    pub rect: FaceRect,
    /// First failed quality check, if any.
    pub rejection: Option<Rejection>,
}

impl ScreenedFace {
    pub fn acceptable(&self) -> bool {
        self.rejection.is_none()
    }
}

pub struct MatchEngine {
    config: MatchConfig,
    locator: Box<dyn FaceLocator>,
    gallery: Arc<dyn GalleryProvider>,
    canonicalizer: Canonicalizer,
    quality: QualityGate,
    cache: RepresentationCache,
}

impl MatchEngine {
    pub fn new(
        config: MatchConfig,
        locator: Box<dyn FaceLocator>,
        gallery: Arc<dyn GalleryProvider>,
    ) -> Self {
        let canonicalizer =
            Canonicalizer::new(config.canonical_size, config.smooth.then_some(config.bilateral));
        let quality = QualityGate::new(config.quality);

        tracing::info!(
            threshold = config.threshold,
            canonical_size = canonicalizer.size(),
            smooth = config.smooth,
            "match engine ready"
        );

        Self {
            config,
            locator,
            gallery,
            canonicalizer,
            quality,
            cache: RepresentationCache::new(),
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn cache(&self) -> &RepresentationCache {
        &self.cache
    }

    /// Gallery records whose face matches a face in the probe, best first.
    pub fn detect_criminal(&self, probe_path: &Path) -> Result<Vec<GalleryRecord>, EngineError> {
        Ok(self.find_matches(probe_path)?.into_records())
    }

    /// Forget every cached gallery representation.
    ///
    /// Call after any record's stored image is added, replaced or deleted.
    pub fn clear_embeddings_cache(&self) {
        self.cache.invalidate();
    }

    /// Match every face in the probe image against the gallery.
    ///
    /// Fails only when the probe cannot be loaded. No faces, an empty gallery
    /// or no record above threshold all yield an empty result.
    pub fn find_matches(&self, probe_path: &Path) -> Result<MatchResult, EngineError> {
        let probe = load_rgb(probe_path)?;
        let enhanced = self.enhance(probe);
        let faces = self.locate(&enhanced)?;

        if faces.is_empty() {
            tracing::info!(probe = %probe_path.display(), "no faces detected in probe");
            return Ok(MatchResult::default());
        }

        let records = self.gallery.list_all();
        // Indexed by gallery position; records without a representation drop out here.
        let references: Vec<(GalleryRecord, Arc<CanonicalFace>)> = records
            .into_iter()
            .filter_map(|record| {
                let face = self.representation(&record)?;
                Some((record, face))
            })
            .collect();

        tracing::debug!(
            faces = faces.len(),
            references = references.len(),
            "scoring probe faces against gallery"
        );

        // (index into references, best score), one entry per record id.
        let mut best: Vec<(usize, f64)> = Vec::new();

        for (face_idx, rect) in faces.iter().enumerate() {
            let Some(probe_face) = self.canonicalizer.canonicalize(&enhanced, rect) else {
                continue;
            };

            let mut face_best: Option<(usize, f64)> = None;
            for (ref_idx, (record, reference)) in references.iter().enumerate() {
                let score = scorer::score(&probe_face, reference);
                tracing::debug!(face = face_idx, record = %record.id, score, "scored");

                let beats = face_best.map_or(true, |(_, s)| score > s);
                if score > self.config.threshold && beats {
                    face_best = Some((ref_idx, score));
                }
            }

            let Some((ref_idx, score)) = face_best else {
                continue;
            };
            let id = &references[ref_idx].0.id;
            match best.iter_mut().find(|(i, _)| references[*i].0.id == *id) {
                Some(entry) if score > entry.1 => *entry = (ref_idx, score),
                Some(_) => {}
                None => best.push((ref_idx, score)),
            }
        }

        best.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let matches: Vec<RecordMatch> = best
            .into_iter()
            .map(|(i, score)| RecordMatch {
                record: references[i].0.clone(),
                score,
            })
            .collect();

        tracing::info!(
            probe = %probe_path.display(),
            faces = faces.len(),
            matches = matches.len(),
            best = matches.first().map(|m| m.score),
            "match complete"
        );

        Ok(MatchResult { matches })
    }

    /// Locate faces and run the quality gate on each, without matching.
    ///
    /// Quality is judged on the unenhanced image.
    pub fn screen(&self, path: &Path) -> Result<Vec<ScreenedFace>, EngineError> {
        let image = load_rgb(path)?;
        let gray = imaging::to_gray(&image);
        let enhanced = self.enhance(image);
        let faces = self.locate(&enhanced)?;

        let screened: Vec<ScreenedFace> = faces
            .into_iter()
            .map(|rect| ScreenedFace {
                rect,
                rejection: self.quality.assess(&gray, &rect).err(),
            })
            .collect();

        tracing::info!(
            path = %path.display(),
            faces = screened.len(),
            acceptable = screened.iter().filter(|f| f.acceptable()).count(),
            "screening complete"
        );

        Ok(screened)
    }

    /// Score the largest face of one image against the largest face of another.
    ///
    /// `Ok(None)` when either image has no usable face.
    pub fn compare(&self, a: &Path, b: &Path) -> Result<Option<f64>, EngineError> {
        let Some(face_a) = self.primary_face(a)? else {
            return Ok(None);
        };
        let Some(face_b) = self.primary_face(b)? else {
            return Ok(None);
        };
        Ok(Some(scorer::score(&face_a, &face_b)))
    }

    /// Cached canonical face for a gallery record, computed on first use.
    pub fn representation(&self, record: &GalleryRecord) -> Option<Arc<CanonicalFace>> {
        let path = self.gallery.resolve_image_path(record);
        self.cache
            .get_or_compute(&path, || self.compute_representation(&record.id, &path))
    }

    fn compute_representation(&self, id: &str, path: &Path) -> Option<CanonicalFace> {
        let face = match self.primary_face(path) {
            Ok(face) => face,
            Err(e) => {
                tracing::warn!(record = id, path = %path.display(), error = %e, "cannot process gallery image");
                return None;
            }
        };
        if face.is_none() {
            tracing::warn!(record = id, path = %path.display(), "no face detected in gallery image");
        }
        face
    }

    /// Canonical form of the largest face in an image file.
    fn primary_face(&self, path: &Path) -> Result<Option<CanonicalFace>, EngineError> {
        let enhanced = self.enhance(load_rgb(path)?);
        let faces = self.locate(&enhanced)?;
        Ok(largest(&faces).and_then(|rect| self.canonicalizer.canonicalize(&enhanced, rect)))
    }

    /// Equalize luminance, then optionally suppress sensor noise.
    fn enhance(&self, mut image: RgbImage) -> RgbImage {
        imaging::equalize_luminance(&mut image);
        if !self.config.enhance_blur {
            return image;
        }
        let (w, h) = image.dimensions();
        let blurred = imaging::gaussian_blur_3x3(image.as_raw(), w as usize, h as usize, 3);
        RgbImage::from_raw(w, h, blurred).unwrap_or(image)
    }

    fn locate(&self, enhanced: &RgbImage) -> Result<Vec<FaceRect>, LocatorError> {
        self.locator.locate(&imaging::to_gray(enhanced))
    }
}

fn load_rgb(path: &Path) -> Result<RgbImage, EngineError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| EngineError::ProbeLoad {
            path: path.to_path_buf(),
            source,
        })
}

/// Largest rectangle by area; the first one wins ties.
fn largest(faces: &[FaceRect]) -> Option<&FaceRect> {
    faces
        .iter()
        .reduce(|best, f| if f.area() > best.area() { f } else { best })
}
