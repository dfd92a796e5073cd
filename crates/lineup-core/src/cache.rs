//! Memoized canonical faces for gallery images.
//!
//! Each key owns a once-cell. The map lock is held only long enough to fetch
//! or insert that cell; the computation itself runs outside it, so a slow
//! decode never blocks lookups of other keys, while concurrent lookups of the
//! same key wait for the single computation instead of repeating it.
//!
//! A failed computation is cached as `None` and not retried until the next
//! [`RepresentationCache::invalidate`].

use crate::types::CanonicalFace;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

type Slot = Arc<OnceLock<Option<Arc<CanonicalFace>>>>;

#[derive(Default)]
pub struct RepresentationCache {
    entries: RwLock<HashMap<PathBuf, Slot>>,
    computations: AtomicU64,
    invalidations: AtomicU64,
}

impl RepresentationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached representation for `key`, computing it on first use.
    pub fn get_or_compute<F>(&self, key: &Path, compute: F) -> Option<Arc<CanonicalFace>>
    where
        F: FnOnce() -> Option<CanonicalFace>,
    {
        let slot = self.slot(key);
        slot.get_or_init(|| {
            self.computations.fetch_add(1, Ordering::Relaxed);
            compute().map(Arc::new)
        })
        .clone()
    }

    /// Peek without computing: `None` when absent or still being computed,
    /// `Some(None)` for a cached failure.
    pub fn get(&self, key: &Path) -> Option<Option<Arc<CanonicalFace>>> {
        let entries = self.entries.read();
        entries.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Drop every entry. Lookups that start after this returns recompute.
    pub fn invalidate(&self) {
        let dropped = {
            let mut entries = self.entries.write();
            let n = entries.len();
            entries.clear();
            n
        };
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::info!(dropped, "representation cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total representations computed since construction.
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    /// Total invalidations since construction.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    fn slot(&self, key: &Path) -> Slot {
        if let Some(slot) = self.entries.read().get(key) {
            return Arc::clone(slot);
        }
        let mut entries = self.entries.write();
        Arc::clone(entries.entry(key.to_path_buf()).or_default())
    }
}
