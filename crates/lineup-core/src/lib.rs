//! lineup-core — match faces in a probe photo against a gallery of reference
//! images, using classical techniques only.
//!
//! A Haar cascade locates faces, each face is reduced to a fixed-size
//! contrast-normalized crop, and crops are compared with a blend of structural
//! similarity and normalized cross-correlation. Gallery crops are computed
//! once per image and cached until the gallery changes.

pub mod cache;
pub mod canonical;
pub mod cascade;
pub mod engine;
pub mod gallery;
pub mod imaging;
pub mod locator;
pub mod quality;
pub mod scorer;
pub mod types;

pub use engine::{EngineError, MatchConfig, MatchEngine, ScreenedFace};
pub use gallery::{DirectoryGallery, GalleryProvider, GalleryRecord, StaticGallery};
pub use locator::{CascadeLocator, FaceLocator, LocatorParams};
pub use types::{CanonicalFace, FaceRect, MatchResult, RecordMatch};
