#![allow(dead_code)]

use image::{Rgb, RgbImage};
use lineup_core::cascade::{HaarCascade, Stage, Stump, WeightedRect};
use lineup_core::gallery::{GalleryRecord, StaticGallery};
use lineup_core::locator::{CascadeLocator, LocatorParams};
use lineup_core::{MatchConfig, MatchEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const BACKGROUND: u8 = 100;
pub const SKIN: u8 = 200;
pub const FEATURE: u8 = 40;

pub const CANVAS_W: u32 = 240;
pub const CANVAS_H: u32 = 200;
pub const FACE_X: u32 = 60;
pub const FACE_Y: u32 = 40;
pub const FACE_SIZE: u32 = 120;

fn rect(x: u32, y: u32, width: u32, height: u32, weight: f32) -> WeightedRect {
    WeightedRect { x, y, width, height, weight }
}

/// One stump per stage: the feature must exceed 0.8 window std-devs.
fn stage(rects: Vec<WeightedRect>) -> Stage {
    Stage {
        threshold: 0.0,
        stumps: vec![Stump {
            rects,
            threshold: 0.8,
            left: -1.0,
            right: 1.0,
        }],
    }
}

/// 24×24 cascade for the cartoon face drawn by [`face_scene`]:
/// eyes darker than cheeks, nose brighter than mouth, bridge brighter than an eye.
pub fn cartoon_cascade() -> HaarCascade {
    HaarCascade {
        window_width: 24,
        window_height: 24,
        stages: vec![
            stage(vec![rect(2, 6, 20, 4, -1.0), rect(2, 11, 20, 4, 1.0)]),
            stage(vec![rect(7, 11, 10, 4, 1.0), rect(7, 16, 10, 3, -1.0)]),
            stage(vec![rect(10, 6, 4, 4, 1.0), rect(4, 6, 6, 4, -1.0)]),
        ],
    }
}

/// Cartoon face of `size` pixels at (`fx`, `fy`) on a flat canvas.
///
/// Drawn on the cascade's 24-unit grid: eyes at rows 6..10, columns 4..10
/// and 14..20; mouth at rows 16..19, columns 7..17.
pub fn face_scene(width: u32, height: u32, fx: u32, fy: u32, size: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let inside = x >= fx && x < fx + size && y >= fy && y < fy + size;
        if !inside {
            return Rgb([BACKGROUND; 3]);
        }
        let u = (x - fx) as f32 * 24.0 / size as f32;
        let v = (y - fy) as f32 * 24.0 / size as f32;
        let eye = (6.0..10.0).contains(&v)
            && ((4.0..10.0).contains(&u) || (14.0..20.0).contains(&u));
        let mouth = (16.0..19.0).contains(&v) && (7.0..17.0).contains(&u);
        if eye || mouth {
            Rgb([FEATURE; 3])
        } else {
            Rgb([SKIN; 3])
        }
    })
}

pub fn default_scene() -> RgbImage {
    face_scene(CANVAS_W, CANVAS_H, FACE_X, FACE_Y, FACE_SIZE)
}

pub fn blank_scene() -> RgbImage {
    RgbImage::from_pixel(CANVAS_W, CANVAS_H, Rgb([BACKGROUND; 3]))
}

pub fn cartoon_locator() -> CascadeLocator {
    CascadeLocator::new(cartoon_cascade(), LocatorParams::default())
}

/// Temporary directory holding gallery and probe images.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn save(&self, name: &str, image: &RgbImage) -> PathBuf {
        let path = self.dir.path().join(name);
        image.save(&path).unwrap();
        path
    }

    pub fn engine(&self, records: Vec<GalleryRecord>) -> MatchEngine {
        let gallery = Arc::new(StaticGallery::with_root(self.path(), records));
        MatchEngine::new(MatchConfig::default(), Box::new(cartoon_locator()), gallery)
    }
}
