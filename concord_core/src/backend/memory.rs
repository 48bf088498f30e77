use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use concord_api::{FileAction, FileInRevision, RevisionNumber};
use concord_handler_api::{FileRetriever, HandlerError, HandlerResult, MaterializedFile};

use super::{Backend, Revision};
use crate::{Error, Result};

#[derive(Debug)]
struct Checkin {
    parents: Vec<RevisionNumber>,
    summary: String,
    files: Vec<FileInRevision>,
}

/// Revisions and file content held in memory.
///
/// Each checkin lists only the files it touches; content for untouched files is
/// looked up along first parents. Deleted files keep the content they had when
/// they were removed.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    checkins: HashMap<RevisionNumber, Checkin>,
    blobs: HashMap<(RevisionNumber, String), Vec<u8>>,
    failing: HashSet<String>,
    parent_lookups: AtomicUsize,
    materializations: AtomicUsize,
}

impl MemoryBackend {
    /// Empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a checkin with its parents and the files it touches.
    pub fn add_revision(
        &mut self,
        number: &str,
        parents: &[&str],
        files: &[(&str, FileAction, &str)],
    ) {
        self.add_revision_with_summary(number, "", parents, files);
    }

    /// Like [`MemoryBackend::add_revision`], with a checkin summary.
    pub fn add_revision_with_summary(
        &mut self,
        number: &str,
        summary: &str,
        parents: &[&str],
        files: &[(&str, FileAction, &str)],
    ) {
        let number = RevisionNumber::new(number);
        let mut listed = Vec::with_capacity(files.len());
        for (path, action, content) in files {
            self.blobs.insert(
                (number.clone(), (*path).to_owned()),
                content.as_bytes().to_vec(),
            );
            listed.push(FileInRevision::new(number.clone(), *path, *action));
        }
        self.checkins.insert(
            number,
            Checkin {
                parents: parents.iter().copied().map(RevisionNumber::from).collect(),
                summary: summary.to_owned(),
                files: listed,
            },
        );
    }

    /// Make every materialization of `path` fail.
    pub fn fail_materialize(&mut self, path: &str) {
        self.failing.insert(path.to_owned());
    }

    /// Revision handle for a recorded checkin, with parents left unresolved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RevisionNotFound`] for unknown numbers.
    pub fn revision(&self, number: &str) -> Result<Revision> {
        let number = RevisionNumber::new(number);
        let checkin = self.checkin(&number)?;
        Ok(Revision::new(number.clone(), checkin.summary.clone()))
    }

    /// How many times parents were asked for.
    pub fn parent_lookups(&self) -> usize {
        self.parent_lookups.load(Ordering::SeqCst)
    }

    /// How many file states were materialized.
    pub fn materializations(&self) -> usize {
        self.materializations.load(Ordering::SeqCst)
    }

    fn checkin(&self, number: &RevisionNumber) -> Result<&Checkin> {
        self.checkins
            .get(number)
            .ok_or_else(|| Error::RevisionNotFound {
                revision: number.to_string(),
            })
    }

    fn content(&self, revision: &RevisionNumber, path: &str) -> Option<&[u8]> {
        let mut current = revision.clone();
        // Parents are strictly older, so the walk terminates.
        loop {
            if let Some(bytes) = self.blobs.get(&(current.clone(), path.to_owned())) {
                return Some(bytes);
            }
            current = self.checkins.get(&current)?.parents.first()?.clone();
        }
    }
}

impl FileRetriever for MemoryBackend {
    fn materialize(&self, file: &FileInRevision) -> HandlerResult<MaterializedFile> {
        self.materializations.fetch_add(1, Ordering::SeqCst);
        let unavailable = |message: &str| HandlerError::Backend {
            path: file.path.clone(),
            revision: file.revision.to_string(),
            message: message.to_owned(),
        };
        if self.failing.contains(&file.path) {
            return Err(unavailable("injected failure"));
        }
        let bytes = self
            .content(&file.revision, &file.path)
            .ok_or_else(|| unavailable("no such file"))?;
        MaterializedFile::from_bytes(&file.path, bytes).map_err(|source| HandlerError::Io {
            path: file.path.clone(),
            source,
        })
    }
}

impl Backend for MemoryBackend {
    fn resolve_parents(&self, revision: &RevisionNumber) -> Result<Vec<RevisionNumber>> {
        self.parent_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.checkin(revision)?.parents.clone())
    }

    fn contains_path(&self, revision: &RevisionNumber, path: &str) -> Result<bool> {
        let mut checkin = self.checkin(revision)?;
        loop {
            if let Some(file) = checkin.files.iter().find(|file| file.path == path) {
                return Ok(file.action != FileAction::Deleted);
            }
            let Some(parent) = checkin.parents.first() else {
                return Ok(false);
            };
            checkin = self.checkin(parent)?;
        }
    }

    fn retriever(&self) -> &dyn FileRetriever {
        self
    }

    fn files_in_revision(&self, revision: &Revision) -> Result<Vec<FileInRevision>> {
        Ok(self.checkin(&revision.number)?.files.clone())
    }

    fn file_size(&self, file: &FileInRevision) -> Option<u64> {
        self.content(&file.revision, &file.path)
            .map(|bytes| bytes.len() as u64)
    }
}
