//! Gallery boundary: where reference records and their images come from.
//!
//! Record storage lives outside this crate. The engine only lists records and
//! resolves their image paths; callers that add, update or delete a record's
//! image must then call `MatchEngine::clear_embeddings_cache`.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A reference identity and the image stored for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryRecord {
    pub id: String,
    /// Image location, possibly relative to the provider's storage root.
    pub image: PathBuf,
}

impl GalleryRecord {
    pub fn new(id: impl Into<String>, image: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
        }
    }
}

/// Source of gallery records, iterated in a stable order.
pub trait GalleryProvider: Send + Sync {
    fn list_all(&self) -> Vec<GalleryRecord>;

    fn resolve_image_path(&self, record: &GalleryRecord) -> PathBuf;
}

/// Gallery backed by an image directory.
///
/// Every file with an image extension is a record whose identifier is the
/// file stem. Records are ordered by file name.
pub struct DirectoryGallery {
    root: PathBuf,
}

impl DirectoryGallery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl GalleryProvider for DirectoryGallery {
    fn list_all(&self) -> Vec<GalleryRecord> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(root = %self.root.display(), error = %e, "cannot read gallery directory");
                return Vec::new();
            }
        };

        let mut names: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| PathBuf::from(entry.file_name()))
            .filter(|name| image::ImageFormat::from_path(name).is_ok())
            .collect();
        names.sort();

        names
            .into_iter()
            .filter_map(|name| {
                let id = name.file_stem()?.to_string_lossy().into_owned();
                Some(GalleryRecord::new(id, name))
            })
            .collect()
    }

    fn resolve_image_path(&self, record: &GalleryRecord) -> PathBuf {
        self.root.join(&record.image)
    }
}

/// In-memory gallery, for embedding callers and tests.
///
/// Relative image paths resolve against the optional root.
#[derive(Default)]
pub struct StaticGallery {
    root: Option<PathBuf>,
    records: RwLock<Vec<GalleryRecord>>,
}

impl StaticGallery {
    pub fn new(records: Vec<GalleryRecord>) -> Self {
        Self {
            root: None,
            records: RwLock::new(records),
        }
    }

    pub fn with_root(root: impl Into<PathBuf>, records: Vec<GalleryRecord>) -> Self {
        Self {
            root: Some(root.into()),
            records: RwLock::new(records),
        }
    }

    /// Insert a record, replacing any existing one with the same identifier
    /// in place.
    pub fn upsert(&self, record: GalleryRecord) {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Remove a record; returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.id != id);
        records.len() != before
    }
}

impl GalleryProvider for StaticGallery {
    fn list_all(&self) -> Vec<GalleryRecord> {
        self.records.read().clone()
    }

    fn resolve_image_path(&self, record: &GalleryRecord) -> PathBuf {
        match &self.root {
            Some(root) => root.join(&record.image),
            None => record.image.clone(),
        }
    }
}
