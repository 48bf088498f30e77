//! Version-control backends and the revision model they hand out.

mod git;
mod memory;

use once_cell::sync::OnceCell;
use tracing::trace;

use concord_api::{FileInRevision, RevisionNumber};
use concord_handler_api::FileRetriever;

use crate::Result;

pub use git::GitBackend;
pub use memory::MemoryBackend;

/// Source of revisions, their parent links and historical file content.
pub trait Backend: FileRetriever + Send + Sync {
    /// Parents of `revision` in backend order (first parent first).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RevisionNotFound`] for unknown revisions or any backend failure.
    fn resolve_parents(&self, revision: &RevisionNumber) -> Result<Vec<RevisionNumber>>;

    /// Files touched by `revision` relative to its first parent, or every file for
    /// an initial checkin.
    ///
    /// # Errors
    ///
    /// Returns any backend failure encountered while enumerating files.
    fn files_in_revision(&self, revision: &Revision) -> Result<Vec<FileInRevision>>;

    /// Whether `path` exists in the snapshot of `revision`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::RevisionNotFound`] for unknown revisions or any backend failure.
    fn contains_path(&self, revision: &RevisionNumber, path: &str) -> Result<bool>;

    /// This backend as a plain content source for handlers.
    fn retriever(&self) -> &dyn FileRetriever;

    /// Size in bytes of a file state, when cheaply known.
    fn file_size(&self, _file: &FileInRevision) -> Option<u64> {
        None
    }
}

/// A committed snapshot together with its lazily resolved parent links.
#[derive(Debug, Clone)]
pub struct Revision {
    /// Backend identifier.
    pub number: RevisionNumber,
    /// First line of the checkin message.
    pub summary: String,
    parents: OnceCell<Vec<RevisionNumber>>,
}

impl Revision {
    /// Revision whose parents will be asked of the backend on first use.
    pub fn new(number: impl Into<RevisionNumber>, summary: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            summary: summary.into(),
            parents: OnceCell::new(),
        }
    }

    /// Revision whose parents are already known.
    #[must_use]
    pub fn with_parents(
        number: impl Into<RevisionNumber>,
        summary: impl Into<String>,
        parents: Vec<RevisionNumber>,
    ) -> Self {
        Self {
            number: number.into(),
            summary: summary.into(),
            parents: OnceCell::with_value(parents),
        }
    }

    /// Resolve parent links, asking the backend at most once.
    ///
    /// # Errors
    ///
    /// Propagates the backend failure; a later call retries.
    pub fn resolve_parents(&self, backend: &dyn Backend) -> Result<&[RevisionNumber]> {
        let parents = self.parents.get_or_try_init(|| {
            trace!(revision = %self.number, "resolving parents");
            backend.resolve_parents(&self.number)
        })?;
        Ok(parents)
    }

    /// Whether resolved parents include at least one revision.
    ///
    /// Unresolved parents count as none.
    #[must_use]
    pub fn has_at_least_one_parent(&self) -> bool {
        self.parents.get().is_some_and(|parents| !parents.is_empty())
    }

    /// Resolved parents in backend order, empty when not yet resolved.
    #[must_use]
    pub fn parent_revision_numbers(&self) -> &[RevisionNumber] {
        self.parents.get().map_or(&[], Vec::as_slice)
    }
}
