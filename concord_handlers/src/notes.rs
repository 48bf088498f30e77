//! Annotation ("notes") store kept next to an annotated file.
//!
//! A store for `lexicon.dict` lives at `lexicon.dict.notes` and holds a JSON
//! document listing annotations such as recorded merge conflicts.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use concord_handler_api::write_atomically;

/// Extension appended to an annotated file's path to locate its store.
pub const NOTES_EXTENSION: &str = "notes";

/// Annotation class used for conflicts recorded by merges.
pub const MERGE_CONFLICT_CLASS: &str = "merge-conflict";

const FORMAT_VERSION: u32 = 1;

/// Errors from reading or writing an annotation store.
#[derive(Debug, thiserror::Error)]
pub enum NotesError {
    /// Filesystem interaction failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Store path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The store is not a valid notes document.
    #[error("malformed notes file {path}: {source}")]
    Parse {
        /// Store path.
        path: String,
        /// JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// The store was written by an incompatible version.
    #[error("notes file {path} has unsupported version {version}")]
    UnsupportedVersion {
        /// Store path.
        path: String,
        /// Version found in the file.
        version: u32,
    },
}

/// A single note attached to an annotated file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Unique id, stable across revisions.
    pub id: String,
    /// Kind of note (e.g., [`MERGE_CONFLICT_CLASS`]).
    pub class: String,
    /// Element of the annotated file the note refers to.
    #[serde(rename = "ref")]
    pub target: String,
    /// Free-form text.
    pub message: String,
    /// Who wrote the note, when known.
    #[serde(default)]
    pub author: Option<String>,
    /// Whether the note has been dealt with.
    #[serde(default)]
    pub resolved: bool,
}

impl Annotation {
    /// New unresolved annotation with a fresh id.
    pub fn new(
        class: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            class: class.into(),
            target: target.into(),
            message: message.into(),
            author: None,
            resolved: false,
        }
    }

    /// Set the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Whether this note records a merge conflict.
    pub fn is_conflict(&self) -> bool {
        self.class == MERGE_CONFLICT_CLASS
    }
}

/// Serialized form of a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotesDocument {
    /// Format version.
    pub version: u32,
    /// Annotations in insertion order.
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl Default for NotesDocument {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            annotations: Vec::new(),
        }
    }
}

impl NotesDocument {
    /// Parse a notes document; `path` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`NotesError::Parse`] for invalid JSON and
    /// [`NotesError::UnsupportedVersion`] for unknown versions.
    pub fn parse(path: &str, text: &str) -> Result<Self, NotesError> {
        let document: Self = serde_json::from_str(text).map_err(|source| NotesError::Parse {
            path: path.to_owned(),
            source,
        })?;
        if document.version != FORMAT_VERSION {
            return Err(NotesError::UnsupportedVersion {
                path: path.to_owned(),
                version: document.version,
            });
        }
        Ok(document)
    }

    /// Annotation with the given id.
    pub fn get(&self, id: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|annotation| annotation.id == id)
    }

    /// Pretty JSON form written to disk.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text)
    }
}

/// Path of the store for `annotated_file`.
pub fn notes_path_for(annotated_file: &Path) -> PathBuf {
    let mut path = annotated_file.as_os_str().to_owned();
    path.push(".");
    path.push(NOTES_EXTENSION);
    PathBuf::from(path)
}

/// Repository path of the file a store annotates (`a.dict.notes` -> `a.dict`).
pub fn annotated_path(notes_path: &str) -> &str {
    notes_path
        .strip_suffix(NOTES_EXTENSION)
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or(notes_path)
}

/// Loaded annotation store for one annotated file.
///
/// Shared by reference; all mutation goes through the internal lock.
#[derive(Debug)]
pub struct AnnotationRepository {
    path: PathBuf,
    document: RwLock<NotesDocument>,
}

impl AnnotationRepository {
    /// Load an existing store.
    ///
    /// # Errors
    ///
    /// Returns [`NotesError`] when the file cannot be read or parsed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, NotesError> {
        let path = path.into();
        let text = fs::read_to_string(&path).map_err(|source| NotesError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let document = NotesDocument::parse(&path.display().to_string(), &text)?;
        debug!(path = %path.display(), annotations = document.annotations.len(), "loaded notes");
        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    /// Load the store at `path`, or start an empty one if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`NotesError`] when an existing file cannot be read or parsed.
    pub fn load_or_create(path: impl Into<PathBuf>) -> Result<Self, NotesError> {
        let path = path.into();
        if path.exists() {
            return Self::load(path);
        }
        debug!(path = %path.display(), "starting empty notes store");
        Ok(Self {
            path,
            document: RwLock::new(NotesDocument::default()),
        })
    }

    /// Location of the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of all annotations.
    pub fn annotations(&self) -> Vec<Annotation> {
        self.document.read().annotations.clone()
    }

    /// Unresolved merge conflicts.
    pub fn open_conflicts(&self) -> Vec<Annotation> {
        self.document
            .read()
            .annotations
            .iter()
            .filter(|annotation| annotation.is_conflict() && !annotation.resolved)
            .cloned()
            .collect()
    }

    /// Number of annotations.
    pub fn len(&self) -> usize {
        self.document.read().annotations.len()
    }

    /// Whether the store holds no annotations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an annotation (not persisted until [`AnnotationRepository::save`]).
    pub fn add_annotation(&self, annotation: Annotation) {
        self.document.write().annotations.push(annotation);
    }

    /// Mark an annotation resolved; returns whether it was found.
    pub fn resolve(&self, id: &str) -> bool {
        let mut document = self.document.write();
        match document.annotations.iter_mut().find(|a| a.id == id) {
            Some(annotation) => {
                annotation.resolved = true;
                true
            }
            None => false,
        }
    }

    /// Persist the store, replacing the file atomically.
    ///
    /// # Errors
    ///
    /// Returns [`NotesError`] when serialization or writing fails.
    pub fn save(&self) -> Result<(), NotesError> {
        let text = self
            .document
            .read()
            .to_json()
            .map_err(|source| NotesError::Parse {
                path: self.path.display().to_string(),
                source,
            })?;
        write_atomically(&self.path, text.as_bytes()).map_err(|source| NotesError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn notes_path_appends_extension() {
        assert_eq!(
            notes_path_for(Path::new("/p/lexicon.dict")),
            PathBuf::from("/p/lexicon.dict.notes")
        );
        assert_eq!(annotated_path("dict/lexicon.dict.notes"), "dict/lexicon.dict");
        assert_eq!(annotated_path("README"), "README");
    }

    #[test]
    fn parse_rejects_unknown_version() {
        let err = NotesDocument::parse("a.notes", r#"{"version": 7, "annotations": []}"#);
        assert!(matches!(
            err,
            Err(NotesError::UnsupportedVersion { version: 7, .. })
        ));
        assert!(matches!(
            NotesDocument::parse("a.notes", "not json"),
            Err(NotesError::Parse { .. })
        ));
    }

    #[test]
    fn save_and_reload_round_trip() -> Result<(), NotesError> {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("lexicon.dict.notes");

        let repo = AnnotationRepository::load_or_create(&path)?;
        assert!(repo.is_empty());
        let conflict =
            Annotation::new(MERGE_CONFLICT_CLASS, "dog", "both edited").with_author("alice");
        let id = conflict.id.clone();
        repo.add_annotation(conflict);
        repo.add_annotation(Annotation::new("question", "cat", "check gloss"));
        repo.save()?;

        let reloaded = AnnotationRepository::load(&path)?;
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.open_conflicts().len(), 1);
        assert!(reloaded.resolve(&id));
        assert!(!reloaded.resolve("missing"));
        assert!(reloaded.open_conflicts().is_empty());
        Ok(())
    }
}
