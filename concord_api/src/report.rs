use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::revision::FileInRevision;

/// Handler id carried by reports that no specialised handler produced.
pub const DEFAULT_HANDLER_ID: &str = "default";

/// Prefix of the action label used when a file's history could not be read.
pub const RETRIEVAL_ERROR_PREFIX: &str = "Error retrieving historical version";

/// Broad category of a change report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Something was introduced.
    Added,
    /// Something existing was edited.
    Changed,
    /// Something was removed.
    Deleted,
    /// An unreconciled merge conflict was recorded.
    Conflict,
    /// History for the file could not be read.
    Error,
}

/// Uniform unit produced by every diff or description operation.
///
/// Equality (and hashing) covers the file identity, the child revision, the
/// kind, the label, the content signature and the detail. The parent
/// reference is not part of it, so the same change seen from two parents of
/// a merge compares equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeReport {
    /// Id of the handler that produced the report.
    pub handler: String,
    /// Category of the change.
    pub kind: ChangeKind,
    /// Human-readable action label (e.g., "Added", "Changed entry").
    pub action_label: String,
    /// Repository-relative path used to re-resolve the report's handler.
    pub path_to_file: String,
    /// State of the file in the inspected revision.
    pub child: FileInRevision,
    /// Pre-change state the child was compared against, if any.
    #[serde(default)]
    pub parent: Option<FileInRevision>,
    /// Handler-specific identity of the changed element (entry key, annotation id).
    #[serde(default)]
    pub signature: Option<String>,
    /// Optional detailed description or error note.
    #[serde(default)]
    pub detail: Option<String>,
}

impl ChangeReport {
    /// Start a report for `child` produced by `handler`.
    pub fn new(
        handler: impl Into<String>,
        kind: ChangeKind,
        action_label: impl Into<String>,
        child: FileInRevision,
    ) -> Self {
        Self {
            handler: handler.into(),
            kind,
            action_label: action_label.into(),
            path_to_file: child.path.clone(),
            child,
            parent: None,
            signature: None,
            detail: None,
        }
    }

    /// Attach the parent state the report was computed against.
    #[must_use]
    pub fn with_parent(mut self, parent: FileInRevision) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Attach the identity of the changed element.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Attach a detailed description.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Default report for a file without a specialised handler that was added.
    pub fn default_added(child: FileInRevision) -> Self {
        Self::new(DEFAULT_HANDLER_ID, ChangeKind::Added, "Added", child)
    }

    /// Default report for a file without a specialised handler that was deleted.
    pub fn default_deleted(child: FileInRevision) -> Self {
        Self::new(DEFAULT_HANDLER_ID, ChangeKind::Deleted, "Deleted", child)
    }

    /// Default report for a modified file without a specialised handler.
    pub fn default_changed(child: FileInRevision, parent: Option<FileInRevision>) -> Self {
        let report = Self::new(DEFAULT_HANDLER_ID, ChangeKind::Changed, "Changed", child);
        match parent {
            Some(parent) => report.with_parent(parent),
            None => report,
        }
    }

    /// Degraded report standing in for a file whose history could not be read.
    pub fn default_error(child: FileInRevision, message: &str) -> Self {
        Self::new(
            DEFAULT_HANDLER_ID,
            ChangeKind::Error,
            format!("{RETRIEVAL_ERROR_PREFIX}: {message}"),
            child,
        )
    }

    /// Whether this report was produced by the default handler.
    pub fn is_default(&self) -> bool {
        self.handler == DEFAULT_HANDLER_ID
    }

    fn identity(&self) -> (&str, &str, ChangeKind, &str, Option<&str>, Option<&str>) {
        (
            &self.path_to_file,
            self.child.revision.as_str(),
            self.kind,
            &self.action_label,
            self.signature.as_deref(),
            self.detail.as_deref(),
        )
    }
}

impl PartialEq for ChangeReport {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for ChangeReport {}

impl Hash for ChangeReport {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::revision::{FileAction, RevisionNumber};

    fn child() -> FileInRevision {
        FileInRevision::new(
            RevisionNumber::new("3333"),
            "lexicon.dict.notes",
            FileAction::Modified,
        )
    }

    #[test]
    fn equality_ignores_parent_reference() {
        let a = ChangeReport::new("conflict-notes", ChangeKind::Conflict, "Conflict", child())
            .with_signature("c-1")
            .with_parent(FileInRevision::parent_of("lexicon.dict.notes", "1111".into()));
        let b = ChangeReport::new("conflict-notes", ChangeKind::Conflict, "Conflict", child())
            .with_signature("c-1")
            .with_parent(FileInRevision::parent_of("lexicon.dict.notes", "2222".into()));

        assert_eq!(a, b);
        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn signature_distinguishes_reports() {
        let a = ChangeReport::new("dictionary", ChangeKind::Added, "Added entry", child())
            .with_signature("dog");
        let b = ChangeReport::new("dictionary", ChangeKind::Added, "Added entry", child())
            .with_signature("cat");
        assert_ne!(a, b);
    }

    #[test]
    fn default_error_carries_message() {
        let report = ChangeReport::default_error(child(), "blob missing");
        assert!(report.is_default());
        assert_eq!(report.kind, ChangeKind::Error);
        assert_eq!(
            report.action_label,
            "Error retrieving historical version: blob missing"
        );
        assert_eq!(report.path_to_file, "lexicon.dict.notes");
    }

    #[test]
    fn default_changed_keeps_synthesized_parent() {
        let parent = FileInRevision::parent_of("lexicon.dict.notes", "1111".into());
        let report = ChangeReport::default_changed(child(), Some(parent.clone()));
        assert_eq!(report.action_label, "Changed");
        assert_eq!(report.parent, Some(parent));
    }

    #[test]
    fn report_deserializes_without_optional_fields() {
        let json = r#"{
            "handler": "default",
            "kind": "added",
            "action_label": "Added",
            "path_to_file": "readme.txt",
            "child": { "revision": "4444", "path": "readme.txt", "action": "added" }
        }"#;
        let report: ChangeReport = serde_json::from_str(json).expect("deserialize report");
        assert!(report.parent.is_none());
        assert!(report.signature.is_none());
        assert_eq!(report.kind, ChangeKind::Added);
    }
}
