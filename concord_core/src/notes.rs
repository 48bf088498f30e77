//! Session-scoped lookup of annotation stores.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use concord_handlers::notes::{notes_path_for, AnnotationRepository, NOTES_EXTENSION};

use crate::{Error, Result};

#[derive(Debug, Default)]
struct CacheState {
    repositories: HashMap<PathBuf, Arc<AnnotationRepository>>,
    scanned: bool,
}

/// Hands out exactly one [`AnnotationRepository`] per store path.
///
/// Construct one per session and pass it to whatever needs annotations.
/// Lookups and inserts happen under a single lock.
#[derive(Debug)]
pub struct AnnotationCache {
    root: PathBuf,
    state: Mutex<CacheState>,
}

impl AnnotationCache {
    /// Empty cache for the project rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Project root; relative paths are resolved against it.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The store annotating `annotated_file`, loading or creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingAnnotatedFile`] when the annotated file does not
    /// exist, or [`Error::Notes`] when an existing store cannot be parsed.
    pub fn get_repository(
        &self,
        annotated_file: impl AsRef<Path>,
    ) -> Result<Arc<AnnotationRepository>> {
        let annotated = self.root.join(annotated_file.as_ref());
        if !annotated.is_file() {
            return Err(Error::MissingAnnotatedFile {
                path: annotated.display().to_string(),
            });
        }
        let canonical = canonicalize(&annotated)?;
        let key = notes_path_for(&canonical);

        let mut state = self.state.lock();
        if let Some(repository) = state.repositories.get(&key) {
            return Ok(Arc::clone(repository));
        }
        let repository = Arc::new(AnnotationRepository::load_or_create(key.clone())?);
        state.repositories.insert(key, Arc::clone(&repository));
        Ok(repository)
    }

    /// Load every store under the root that is not cached yet.
    ///
    /// Only the first call scans; later calls return immediately until
    /// [`AnnotationCache::release_all`].
    ///
    /// # Errors
    ///
    /// Returns an error when a directory cannot be listed or a store cannot be
    /// parsed. The scan is retried on the next call in that case.
    pub fn ensure_all_loaded(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.scanned {
            return Ok(());
        }
        let found = find_stores(&self.root)?;
        let mut loaded = 0usize;
        for path in found {
            let key = canonicalize(&path)?;
            if state.repositories.contains_key(&key) {
                continue;
            }
            let repository = AnnotationRepository::load(key.clone())?;
            state.repositories.insert(key, Arc::new(repository));
            loaded += 1;
        }
        state.scanned = true;
        info!(root = %self.root.display(), loaded, "loaded annotation stores");
        Ok(())
    }

    /// Number of cached stores.
    pub fn len(&self) -> usize {
        self.state.lock().repositories.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached store and allow the next full scan.
    pub fn release_all(&self) {
        let mut state = self.state.lock();
        debug!(released = state.repositories.len(), "releasing annotation stores");
        *state = CacheState::default();
    }
}

fn canonicalize(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })
}

fn find_stores(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|source| Error::Io {
            path: dir.display().to_string(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| Error::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|source| Error::Io {
                path: path.display().to_string(),
                source,
            })?;
            if file_type.is_dir() {
                if entry.file_name() != ".git" {
                    pending.push(path);
                }
            } else if path.extension().is_some_and(|ext| ext == NOTES_EXTENSION) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}
