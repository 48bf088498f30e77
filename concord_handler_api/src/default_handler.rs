use concord_api::{ChangeKind, ChangeReport, FileInRevision, DEFAULT_HANDLER_ID};

use crate::{
    FileRetriever, FormatHandler, HandlerResult, MaterializedFile, MergeFailure, MergeOrder,
    MergeOutcome,
};

/// Fallback used when no registered handler claims a file.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

impl FormatHandler for DefaultHandler {
    fn id(&self) -> &'static str {
        DEFAULT_HANDLER_ID
    }

    fn label(&self) -> &'static str {
        "Any file"
    }

    fn can_handle(&self, _path: &str) -> bool {
        true
    }

    fn two_way_diff(
        &self,
        parent: &FileInRevision,
        child: &FileInRevision,
        _retriever: &dyn FileRetriever,
    ) -> HandlerResult<Vec<ChangeReport>> {
        Ok(vec![ChangeReport::default_changed(
            child.clone(),
            Some(parent.clone()),
        )])
    }

    fn describe_initial_contents(
        &self,
        file: &FileInRevision,
        _content: &MaterializedFile,
    ) -> HandlerResult<Vec<ChangeReport>> {
        Ok(vec![ChangeReport::default_added(file.clone())])
    }

    fn three_way_merge(&self, order: &MergeOrder) -> Result<MergeOutcome, MergeFailure> {
        Err(MergeFailure::NoHandler {
            path: order.situation.path_in_repo.clone(),
        })
    }

    fn present(&self, report: &ChangeReport) -> String {
        let mut text = match report.kind {
            ChangeKind::Error => format!("{} ({})", report.action_label, report.path_to_file),
            _ => format!("{} {}", report.action_label, report.path_to_file),
        };
        if let Some(parent) = &report.parent {
            text.push_str(&format!(" (since {})", parent.revision.short()));
        }
        if let Some(detail) = &report.detail {
            text.push_str(": ");
            text.push_str(detail);
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use concord_api::{FileAction, RevisionNumber};

    use super::*;
    use crate::MergeSituation;

    fn child() -> FileInRevision {
        FileInRevision::new(
            RevisionNumber::new("abcdef0123456789"),
            "img/logo.png",
            FileAction::Modified,
        )
    }

    #[test]
    fn presents_changed_with_parent() {
        let report = ChangeReport::default_changed(
            child(),
            Some(FileInRevision::parent_of("img/logo.png", "0123456789abcdef".into())),
        );
        assert_eq!(
            DefaultHandler.present(&report),
            "Changed img/logo.png (since 0123456789)"
        );
    }

    #[test]
    fn presents_error_reports() {
        let report = ChangeReport::default_error(child(), "object not found");
        assert_eq!(
            DefaultHandler.present(&report),
            "Error retrieving historical version: object not found (img/logo.png)"
        );
    }

    #[test]
    fn refuses_to_merge() {
        let order = MergeOrder::new(
            "ours.png",
            "theirs.png",
            "ancestor.png",
            MergeSituation::new("img/logo.png", "alice", "bob"),
        );
        assert!(matches!(
            DefaultHandler.three_way_merge(&order),
            Err(MergeFailure::NoHandler { path }) if path == "img/logo.png"
        ));
    }
}
