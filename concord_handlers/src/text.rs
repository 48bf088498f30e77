use concord_api::{ChangeKind, ChangeReport, FileInRevision};
use concord_handler_api::{
    has_extension, FileRetriever, FormatHandler, HandlerResult, MaterializedFile, MergeConflict,
    MergeFailure, MergeOrder, MergeOutcome, MergeSide,
};
use similar::{ChangeTag, TextDiff};
use tracing::debug;

const ID: &str = "text";
const CONFLICT_START: &str = "<<<<<<<";

/// Line-based handling for plain text and markdown.
#[derive(Debug, Default)]
pub struct TextHandler;

impl FormatHandler for TextHandler {
    fn id(&self) -> &'static str {
        ID
    }

    fn label(&self) -> &'static str {
        "Plain text"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["txt", "md"]
    }

    fn can_handle(&self, path: &str) -> bool {
        has_extension(path, self.extensions())
    }

    fn two_way_diff(
        &self,
        parent: &FileInRevision,
        child: &FileInRevision,
        retriever: &dyn FileRetriever,
    ) -> HandlerResult<Vec<ChangeReport>> {
        let old = retriever.materialize(parent)?.read_to_string()?;
        let new = retriever.materialize(child)?.read_to_string()?;

        let diff = TextDiff::from_lines(&old, &new);
        let (mut added, mut removed) = (0usize, 0usize);
        for change in diff.iter_all_changes() {
            match change.tag() {
                ChangeTag::Insert => added += 1,
                ChangeTag::Delete => removed += 1,
                ChangeTag::Equal => {}
            }
        }
        if added == 0 && removed == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![ChangeReport::new(
            ID,
            ChangeKind::Changed,
            "Edited text",
            child.clone(),
        )
        .with_parent(parent.clone())
        .with_detail(format!("+{added}/-{removed} lines"))])
    }

    fn describe_initial_contents(
        &self,
        file: &FileInRevision,
        content: &MaterializedFile,
    ) -> HandlerResult<Vec<ChangeReport>> {
        let text = content.read_to_string()?;
        Ok(vec![ChangeReport::new(
            ID,
            ChangeKind::Added,
            "Added text",
            file.clone(),
        )
        .with_detail(format!("{} lines", text.lines().count()))])
    }

    fn three_way_merge(&self, order: &MergeOrder) -> Result<MergeOutcome, MergeFailure> {
        let ancestor = order.read_text(MergeSide::Ancestor)?;
        let ours = order.read_text(MergeSide::Ours)?;
        let theirs = order.read_text(MergeSide::Theirs)?;

        let mut outcome = MergeOutcome::clean();
        let merged = match diffy::merge(&ancestor, &ours, &theirs) {
            Ok(clean) => clean,
            Err(marked) => {
                let regions = marked
                    .lines()
                    .filter(|line| line.starts_with(CONFLICT_START))
                    .count();
                for region in 1..=regions {
                    outcome.conflicts.push(MergeConflict::new(
                        &order.situation,
                        format!("region {region}"),
                        "conflicting line edits left inline with conflict markers",
                    ));
                }
                marked
            }
        };
        order.write_result(merged.as_bytes())?;
        debug!(
            path = %order.situation.path_in_repo,
            conflicts = outcome.conflicts.len(),
            "merged text"
        );
        Ok(outcome)
    }

    fn present(&self, report: &ChangeReport) -> String {
        match &report.detail {
            Some(detail) => format!("{} {} ({detail})", report.action_label, report.path_to_file),
            None => format!("{} {}", report.action_label, report.path_to_file),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use concord_api::{FileAction, RevisionNumber};
    use concord_handler_api::{HandlerError, MergeSituation};
    use tempfile::TempDir;

    use super::*;

    struct Pair<'a>(&'a str, &'a str);

    impl FileRetriever for Pair<'_> {
        fn materialize(&self, file: &FileInRevision) -> HandlerResult<MaterializedFile> {
            let text = if file.action == FileAction::Parent {
                self.0
            } else {
                self.1
            };
            MaterializedFile::from_bytes(&file.path, text.as_bytes()).map_err(|source| {
                HandlerError::Io {
                    path: file.path.clone(),
                    source,
                }
            })
        }
    }

    fn files() -> (FileInRevision, FileInRevision) {
        (
            FileInRevision::parent_of("story.txt", RevisionNumber::new("p")),
            FileInRevision::new("c".into(), "story.txt", FileAction::Modified),
        )
    }

    #[test]
    fn counts_added_and_removed_lines() -> HandlerResult<()> {
        let (parent, child) = files();
        let reports =
            TextHandler.two_way_diff(&parent, &child, &Pair("one\ntwo\n", "one\n2\nthree\n"))?;
        assert_eq!(reports.len(), 1);
        assert_eq!(
            TextHandler.present(&reports[0]),
            "Edited text story.txt (+2/-1 lines)"
        );
        Ok(())
    }

    #[test]
    fn identical_text_has_no_reports() -> HandlerResult<()> {
        let (parent, child) = files();
        let reports = TextHandler.two_way_diff(&parent, &child, &Pair("same\n", "same\n"))?;
        assert!(reports.is_empty());
        Ok(())
    }

    fn order(temp: &TempDir, ancestor: &str, ours: &str, theirs: &str) -> MergeOrder {
        let write = |name: &str, text: &str| {
            let path = temp.path().join(name);
            fs::write(&path, text).expect("write");
            path
        };
        MergeOrder::new(
            write("ours.txt", ours),
            write("theirs.txt", theirs),
            write("ancestor.txt", ancestor),
            MergeSituation::new("story.txt", "alice", "bob"),
        )
    }

    #[test]
    fn clean_merge_combines_edits() -> Result<(), MergeFailure> {
        let temp = TempDir::new().expect("tempdir");
        let order = order(
            &temp,
            "a\nb\nc\nd\ne\n",
            "A\nb\nc\nd\ne\n",
            "a\nb\nc\nd\nE\n",
        );
        let outcome = TextHandler.three_way_merge(&order)?;
        assert!(!outcome.has_conflicts());
        assert_eq!(
            fs::read_to_string(&order.ours).expect("read"),
            "A\nb\nc\nd\nE\n"
        );
        Ok(())
    }

    #[test]
    fn conflicting_merge_writes_markers() -> Result<(), MergeFailure> {
        let temp = TempDir::new().expect("tempdir");
        let order = order(&temp, "a\nb\nc\n", "a\nB1\nc\n", "a\nB2\nc\n");
        let outcome = TextHandler.three_way_merge(&order)?;
        assert_eq!(outcome.conflicts.len(), 1);
        let merged = fs::read_to_string(&order.ours).expect("read");
        assert!(merged.contains("<<<<<<<"));
        assert!(merged.contains("B1") && merged.contains("B2"));
        Ok(())
    }

    #[test]
    fn binary_input_fails_without_touching_ours() {
        let temp = TempDir::new().expect("tempdir");
        let order = order(&temp, "a\n", "ours\n", "theirs\n");
        fs::write(&order.theirs, [0xff, 0xfe, 0x00]).expect("write");
        assert!(matches!(
            TextHandler.three_way_merge(&order),
            Err(MergeFailure::Content { .. })
        ));
        assert_eq!(fs::read_to_string(&order.ours).expect("read"), "ours\n");
    }
}
