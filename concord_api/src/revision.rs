use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a committed revision (e.g., a git SHA).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionNumber(String);

impl RevisionNumber {
    /// Wrap a backend revision identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form used in human-readable output.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(10)
            .map_or(self.0.len(), |(idx, _)| idx);
        &self.0[..end]
    }
}

impl fmt::Display for RevisionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RevisionNumber {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Action that produced a file's state within a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    /// File first appears in the revision.
    Added,
    /// File existed before and its content changed.
    Modified,
    /// File was removed by the revision.
    Deleted,
    /// Reference to the pre-change state of a file, only used as the left side of a diff.
    Parent,
}

impl FileAction {
    /// Stable tag used by backends and serialized forms.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Parent => "parent",
        }
    }

    /// Parse a stable tag; unknown tags yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "added" => Some(Self::Added),
            "modified" => Some(Self::Modified),
            "deleted" => Some(Self::Deleted),
            "parent" => Some(Self::Parent),
            _ => None,
        }
    }
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file's state within one revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileInRevision {
    /// Revision that holds this state of the file.
    pub revision: RevisionNumber,
    /// Repository-relative path using `/` separators.
    pub path: String,
    /// Action that produced this state.
    pub action: FileAction,
}

impl FileInRevision {
    /// Construct a file reference.
    pub fn new(revision: RevisionNumber, path: impl Into<String>, action: FileAction) -> Self {
        Self {
            revision,
            path: path.into(),
            action,
        }
    }

    /// Reference to the same logical file as it stood in `parent`.
    pub fn parent_of(path: impl Into<String>, parent: RevisionNumber) -> Self {
        Self::new(parent, path, FileAction::Parent)
    }

    /// Final path component, for display.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}
