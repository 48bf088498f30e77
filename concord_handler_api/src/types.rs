use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use concord_api::RevisionNumber;

use crate::retrieve::write_atomically;

/// Which side's content survives an automatically resolved conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictHandling {
    /// Keep "ours".
    #[default]
    WeWin,
    /// Keep "theirs".
    TheyWin,
}

/// One of the three inputs of a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSide {
    /// The local version, replaced by the merge result.
    Ours,
    /// The incoming version.
    Theirs,
    /// The common ancestor.
    Ancestor,
}

/// Context describing who and what is being merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSituation {
    /// Repository-relative path of the merged file, used for handler resolution.
    pub path_in_repo: String,
    /// Label for the local side (typically a user id).
    pub ours_label: String,
    /// Label for the incoming side.
    pub theirs_label: String,
    /// Revision of the local side, when known.
    #[serde(default)]
    pub ours_revision: Option<RevisionNumber>,
    /// Revision of the incoming side, when known.
    #[serde(default)]
    pub theirs_revision: Option<RevisionNumber>,
    /// Winner of automatically resolved conflicts.
    #[serde(default)]
    pub conflict_handling: ConflictHandling,
}

impl MergeSituation {
    /// Situation with no revision information and "we win" conflict handling.
    pub fn new(
        path_in_repo: impl Into<String>,
        ours_label: impl Into<String>,
        theirs_label: impl Into<String>,
    ) -> Self {
        Self {
            path_in_repo: path_in_repo.into(),
            ours_label: ours_label.into(),
            theirs_label: theirs_label.into(),
            ours_revision: None,
            theirs_revision: None,
            conflict_handling: ConflictHandling::WeWin,
        }
    }

    /// Record the revisions of both sides.
    #[must_use]
    pub fn with_revisions(mut self, ours: RevisionNumber, theirs: RevisionNumber) -> Self {
        self.ours_revision = Some(ours);
        self.theirs_revision = Some(theirs);
        self
    }

    /// Choose which side wins automatically resolved conflicts.
    #[must_use]
    pub const fn with_conflict_handling(mut self, handling: ConflictHandling) -> Self {
        self.conflict_handling = handling;
        self
    }

    /// Label of the side that wins conflicts.
    pub fn winner_label(&self) -> &str {
        match self.conflict_handling {
            ConflictHandling::WeWin => &self.ours_label,
            ConflictHandling::TheyWin => &self.theirs_label,
        }
    }

    /// Whether the local side wins conflicts.
    pub const fn we_win(&self) -> bool {
        matches!(self.conflict_handling, ConflictHandling::WeWin)
    }
}

/// Request to merge three versions of a file, writing the result over `ours`.
#[derive(Debug, Clone)]
pub struct MergeOrder {
    /// Local version; replaced with the merge result.
    pub ours: PathBuf,
    /// Incoming version.
    pub theirs: PathBuf,
    /// Common ancestor version.
    pub ancestor: PathBuf,
    /// Who and what is being merged.
    pub situation: MergeSituation,
}

impl MergeOrder {
    /// Construct a merge order.
    pub fn new(
        ours: impl Into<PathBuf>,
        theirs: impl Into<PathBuf>,
        ancestor: impl Into<PathBuf>,
        situation: MergeSituation,
    ) -> Self {
        Self {
            ours: ours.into(),
            theirs: theirs.into(),
            ancestor: ancestor.into(),
            situation,
        }
    }

    /// Filesystem path of one side.
    pub fn path(&self, side: MergeSide) -> &Path {
        match side {
            MergeSide::Ours => &self.ours,
            MergeSide::Theirs => &self.theirs,
            MergeSide::Ancestor => &self.ancestor,
        }
    }

    /// Read one side as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`MergeFailure::Io`] when the file cannot be read and
    /// [`MergeFailure::Content`] when it is not valid UTF-8.
    pub fn read_text(&self, side: MergeSide) -> Result<String, MergeFailure> {
        let path = self.path(side);
        let bytes = fs::read(path).map_err(|source| MergeFailure::Io {
            path: path.display().to_string(),
            source,
        })?;
        String::from_utf8(bytes).map_err(|_| MergeFailure::Content {
            path: self.situation.path_in_repo.clone(),
            message: format!("{side:?} side is not valid UTF-8 text"),
        })
    }

    /// Replace `ours` with the merged bytes without leaving a partial file.
    ///
    /// # Errors
    ///
    /// Returns [`MergeFailure::Io`] when the scratch file cannot be written or moved.
    pub fn write_result(&self, merged: &[u8]) -> Result<(), MergeFailure> {
        write_atomically(&self.ours, merged).map_err(|source| MergeFailure::Io {
            path: self.ours.display().to_string(),
            source,
        })
    }
}

/// A conflict that the merge resolved automatically but which a person should review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConflict {
    /// Repository-relative path of the merged file.
    pub path_in_repo: String,
    /// Element the conflict is about (entry key, config key, line region).
    pub context: String,
    /// What happened on each side.
    pub description: String,
    /// Label of the side whose content was kept.
    pub winner: String,
}

impl MergeConflict {
    /// Construct a conflict for the file described by `situation`.
    pub fn new(
        situation: &MergeSituation,
        context: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            path_in_repo: situation.path_in_repo.clone(),
            context: context.into(),
            description: description.into(),
            winner: situation.winner_label().to_owned(),
        }
    }
}

/// Result of a successful (possibly conflicted) merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Conflicts resolved automatically or marked inline.
    pub conflicts: Vec<MergeConflict>,
    /// Non-fatal oddities noticed while merging.
    pub warnings: Vec<String>,
}

impl MergeOutcome {
    /// Outcome without conflicts.
    pub fn clean() -> Self {
        Self::default()
    }

    /// Whether any conflict was recorded.
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Errors from diffing or describing a single file. The inspector contains these.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Reading materialized content failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File whose content could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Content could not be understood by the handler.
    #[error("{path}: {message}")]
    Content {
        /// File whose content is malformed.
        path: String,
        /// What is wrong with it.
        message: String,
    },
    /// The backend could not provide the requested file state.
    #[error("{path} at revision {revision} is unavailable: {message}")]
    Backend {
        /// Requested file.
        path: String,
        /// Requested revision.
        revision: String,
        /// Backend explanation.
        message: String,
    },
}

impl HandlerError {
    /// Helper to construct a content error.
    pub fn content(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Content {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Convenience result alias for handler operations.
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// Irrecoverable three-way merge failures. "Merged with conflicts" is not one of these.
#[derive(Debug, thiserror::Error)]
pub enum MergeFailure {
    /// No handler knows how to merge the file.
    #[error("no handler can merge files like {path}")]
    NoHandler {
        /// Repository-relative path of the file.
        path: String,
    },
    /// Reading inputs or writing the result failed.
    #[error("failed to access {path} during merge: {source}")]
    Io {
        /// File involved in the failed operation.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// One of the inputs is malformed.
    #[error("cannot merge {path}: {message}")]
    Content {
        /// Repository-relative path of the file.
        path: String,
        /// What is wrong with the input.
        message: String,
    },
}

/// Case-insensitive extension test shared by handlers' `can_handle`.
pub fn has_extension(path: &str, extensions: &[&str]) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_match_is_case_insensitive() {
        assert!(has_extension("dict/Lexicon.DICT", &["dict"]));
        assert!(has_extension("a/b/notes.txt", &["md", "txt"]));
        assert!(!has_extension("README", &["txt"]));
        assert!(!has_extension("lexicon.dict.notes", &["dict"]));
    }

    #[test]
    fn winner_follows_conflict_handling() {
        let situation = MergeSituation::new("a.dict", "alice", "bob");
        assert_eq!(situation.winner_label(), "alice");
        let situation = situation.with_conflict_handling(ConflictHandling::TheyWin);
        assert_eq!(situation.winner_label(), "bob");
        assert!(!situation.we_win());
    }

    #[test]
    fn handler_error_messages_include_context() {
        let err = HandlerError::content("lexicon.dict", "duplicate entry 'dog'");
        assert_eq!(err.to_string(), "lexicon.dict: duplicate entry 'dog'");
    }
}
