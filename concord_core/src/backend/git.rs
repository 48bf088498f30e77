use std::path::{Path, PathBuf};

use git2::{Commit, Delta, ErrorClass, ErrorCode, Oid, Repository as GitRepository};
use parking_lot::Mutex;
use tracing::{debug, trace};

use concord_api::{FileAction, FileInRevision, RevisionNumber};
use concord_handler_api::{FileRetriever, HandlerError, HandlerResult, MaterializedFile};

use super::{Backend, Revision};
use crate::{Error, Result};

/// Backend reading revisions from a git working tree through libgit2.
pub struct GitBackend {
    inner: Mutex<GitRepository>,
    root: PathBuf,
}

impl GitBackend {
    /// Open the repository containing `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be canonicalized, does not resolve
    /// to a git repository, or resolves to a bare repository.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let original = path.as_ref();
        let canonical = std::fs::canonicalize(original).map_err(|source| Error::Io {
            path: original.display().to_string(),
            source,
        })?;

        let repo = match GitRepository::discover(&canonical) {
            Ok(repo) => repo,
            Err(err)
                if err.class() == ErrorClass::Repository && err.code() == ErrorCode::NotFound =>
            {
                return Err(Error::NotARepository {
                    path: canonical.display().to_string(),
                })
            }
            Err(err) => return Err(Error::from(err)),
        };

        let root = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::BareRepository {
                path: canonical.display().to_string(),
            })?;
        debug!(root = %root.display(), "opened git backend");

        Ok(Self {
            inner: Mutex::new(repo),
            root,
        })
    }

    /// Absolute path of the working tree.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The revision HEAD points at, or `None` on an unborn branch.
    ///
    /// # Errors
    ///
    /// Returns any error produced while resolving HEAD.
    pub fn head_revision(&self) -> Result<Option<Revision>> {
        let repo = self.inner.lock();
        let head = match repo.head() {
            Ok(head) => head,
            Err(err)
                if matches!(
                    (err.class(), err.code()),
                    (
                        ErrorClass::Reference,
                        ErrorCode::NotFound | ErrorCode::UnbornBranch
                    )
                ) =>
            {
                return Ok(None)
            }
            Err(err) => return Err(Error::from(err)),
        };
        let commit = head.peel_to_commit()?;
        Ok(Some(to_revision(&commit)))
    }

    /// Resolve a revision spec such as `HEAD~2`, a branch or a commit id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RevisionNotFound`] when `spec` names no commit.
    pub fn revision(&self, spec: &str) -> Result<Revision> {
        let repo = self.inner.lock();
        let commit = repo
            .revparse_single(spec)
            .and_then(|object| object.peel_to_commit())
            .map_err(|err| not_found(err, spec))?;
        Ok(to_revision(&commit))
    }

    fn blob(&self, file: &FileInRevision) -> std::result::Result<Vec<u8>, String> {
        let repo = self.inner.lock();
        let id = entry_id(&repo, file)?;
        let blob = repo.find_blob(id).map_err(|err| err.message().to_owned())?;
        Ok(blob.content().to_vec())
    }
}

/// Object id of the blob holding `file`.
fn entry_id(repo: &GitRepository, file: &FileInRevision) -> std::result::Result<Oid, String> {
    let commit = find_commit(repo, &file.revision).map_err(|err| err.to_string())?;
    // A deleted file only exists in the state before the deletion.
    let commit = if file.action == FileAction::Deleted {
        commit
            .parent(0)
            .map_err(|_| "deleted file has no parent state".to_owned())?
    } else {
        commit
    };
    let tree = commit.tree().map_err(|err| err.message().to_owned())?;
    let entry = tree
        .get_path(Path::new(&file.path))
        .map_err(|err| err.message().to_owned())?;
    Ok(entry.id())
}

impl FileRetriever for GitBackend {
    fn materialize(&self, file: &FileInRevision) -> HandlerResult<MaterializedFile> {
        let bytes = self.blob(file).map_err(|message| HandlerError::Backend {
            path: file.path.clone(),
            revision: file.revision.to_string(),
            message,
        })?;
        trace!(
            path = %file.path,
            revision = %file.revision.short(),
            bytes = bytes.len(),
            "read blob"
        );
        MaterializedFile::from_bytes(&file.path, &bytes).map_err(|source| HandlerError::Io {
            path: file.path.clone(),
            source,
        })
    }
}

impl Backend for GitBackend {
    fn resolve_parents(&self, revision: &RevisionNumber) -> Result<Vec<RevisionNumber>> {
        let repo = self.inner.lock();
        let commit = find_commit(&repo, revision)?;
        Ok(commit
            .parent_ids()
            .map(|id| RevisionNumber::new(id.to_string()))
            .collect())
    }

    fn contains_path(&self, revision: &RevisionNumber, path: &str) -> Result<bool> {
        let repo = self.inner.lock();
        let tree = find_commit(&repo, revision)?.tree()?;
        match tree.get_path(Path::new(path)) {
            Ok(_) => Ok(true),
            Err(err) if err.code() == ErrorCode::NotFound => Ok(false),
            Err(err) => Err(Error::from(err)),
        }
    }

    fn retriever(&self) -> &dyn FileRetriever {
        self
    }

    fn files_in_revision(&self, revision: &Revision) -> Result<Vec<FileInRevision>> {
        let repo = self.inner.lock();
        let commit = find_commit(&repo, &revision.number)?;
        let tree = commit.tree()?;
        let parent_tree = if commit.parent_count() == 0 {
            None
        } else {
            Some(commit.parent(0)?.tree()?)
        };
        let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;

        let mut files = Vec::new();
        for delta in diff.deltas() {
            let (action, side) = match delta.status() {
                Delta::Added => (FileAction::Added, delta.new_file()),
                Delta::Deleted => (FileAction::Deleted, delta.old_file()),
                Delta::Modified | Delta::Typechange => (FileAction::Modified, delta.new_file()),
                other => {
                    trace!(status = ?other, "skipping delta");
                    continue;
                }
            };
            let Some(path) = side.path().and_then(Path::to_str) else {
                debug!(revision = %revision.number.short(), "skipping non UTF-8 path");
                continue;
            };
            files.push(FileInRevision::new(
                revision.number.clone(),
                path.replace('\\', "/"),
                action,
            ));
        }
        Ok(files)
    }

    fn file_size(&self, file: &FileInRevision) -> Option<u64> {
        let repo = self.inner.lock();
        let id = entry_id(&repo, file).ok()?;
        let (size, _) = repo.odb().ok()?.read_header(id).ok()?;
        Some(size as u64)
    }
}

impl std::fmt::Debug for GitBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitBackend")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

fn find_commit<'repo>(
    repo: &'repo GitRepository,
    revision: &RevisionNumber,
) -> Result<Commit<'repo>> {
    let oid = Oid::from_str(revision.as_str()).map_err(|err| not_found(err, revision.as_str()))?;
    repo.find_commit(oid)
        .map_err(|err| not_found(err, revision.as_str()))
}

fn not_found(err: git2::Error, revision: &str) -> Error {
    match err.code() {
        ErrorCode::NotFound | ErrorCode::Ambiguous | ErrorCode::InvalidSpec => {
            Error::RevisionNotFound {
                revision: revision.to_owned(),
            }
        }
        _ if err.class() == ErrorClass::Invalid => Error::RevisionNotFound {
            revision: revision.to_owned(),
        },
        _ => Error::from(err),
    }
}

fn to_revision(commit: &Commit<'_>) -> Revision {
    Revision::new(
        RevisionNumber::new(commit.id().to_string()),
        commit.summary().unwrap_or_default(),
    )
}
