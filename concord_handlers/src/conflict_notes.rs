use std::collections::HashSet;

use concord_api::{ChangeKind, ChangeReport, FileInRevision};
use concord_handler_api::{
    has_extension, FileRetriever, FormatHandler, HandlerError, HandlerResult, MaterializedFile,
    MergeFailure, MergeOrder, MergeOutcome, MergeSide,
};
use tracing::debug;

use crate::notes::{annotated_path, Annotation, NotesDocument, NOTES_EXTENSION};

/// Handler for annotation stores; the only handler whose reports survive a merge checkin.
#[derive(Debug, Default)]
pub struct ConflictNotesHandler;

const ID: &str = "conflict-notes";

impl FormatHandler for ConflictNotesHandler {
    fn id(&self) -> &'static str {
        ID
    }

    fn label(&self) -> &'static str {
        "Conflict notes"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[NOTES_EXTENSION]
    }

    fn can_handle(&self, path: &str) -> bool {
        has_extension(path, &[NOTES_EXTENSION])
    }

    fn records_conflicts(&self) -> bool {
        true
    }

    fn two_way_diff(
        &self,
        parent: &FileInRevision,
        child: &FileInRevision,
        retriever: &dyn FileRetriever,
    ) -> HandlerResult<Vec<ChangeReport>> {
        let before = load(&retriever.materialize(parent)?)?;
        let after = load(&retriever.materialize(child)?)?;

        let mut reports = Vec::new();
        for annotation in &after.annotations {
            match before.get(&annotation.id) {
                None => reports.push(report_for(child, annotation).with_parent(parent.clone())),
                Some(previous) if !previous.resolved && annotation.resolved => reports.push(
                    ChangeReport::new(ID, ChangeKind::Changed, "Resolved", child.clone())
                        .with_parent(parent.clone())
                        .with_signature(&annotation.id)
                        .with_detail(&annotation.message),
                ),
                Some(_) => {}
            }
        }
        debug!(path = %child.path, reports = reports.len(), "diffed notes");
        Ok(reports)
    }

    fn describe_initial_contents(
        &self,
        file: &FileInRevision,
        content: &MaterializedFile,
    ) -> HandlerResult<Vec<ChangeReport>> {
        let document = load(content)?;
        Ok(document
            .annotations
            .iter()
            .map(|annotation| report_for(file, annotation))
            .collect())
    }

    fn three_way_merge(&self, order: &MergeOrder) -> Result<MergeOutcome, MergeFailure> {
        let path = &order.situation.path_in_repo;
        let ancestor = parse_side(order, MergeSide::Ancestor)?;
        let ours = parse_side(order, MergeSide::Ours)?;
        let theirs = parse_side(order, MergeSide::Theirs)?;

        let mut outcome = MergeOutcome::clean();
        let mut merged = NotesDocument::default();
        let mut seen = HashSet::new();

        for mine in &ours.annotations {
            seen.insert(mine.id.as_str());
            let result = match (theirs.get(&mine.id), ancestor.get(&mine.id)) {
                (Some(other), _) if other == mine => mine.clone(),
                (Some(other), Some(base)) if base == mine => other.clone(),
                (Some(other), Some(base)) if base == other => mine.clone(),
                (Some(other), _) => {
                    outcome.warnings.push(format!(
                        "note {} was edited on both sides; kept {}'s text",
                        mine.id,
                        order.situation.winner_label()
                    ));
                    let mut kept = if order.situation.we_win() {
                        mine.clone()
                    } else {
                        other.clone()
                    };
                    kept.resolved = mine.resolved || other.resolved;
                    kept
                }
                (None, Some(base)) if base == mine => continue,
                (None, _) => mine.clone(),
            };
            merged.annotations.push(result);
        }

        for other in &theirs.annotations {
            if seen.contains(other.id.as_str()) {
                continue;
            }
            match ancestor.get(&other.id) {
                Some(base) if base == other => {}
                _ => merged.annotations.push(other.clone()),
            }
        }

        let text = merged.to_json().map_err(|err| MergeFailure::Content {
            path: path.clone(),
            message: err.to_string(),
        })?;
        order.write_result(text.as_bytes())?;
        debug!(path = %path, annotations = merged.annotations.len(), "merged notes");
        Ok(outcome)
    }

    fn present(&self, report: &ChangeReport) -> String {
        let target = annotated_path(&report.path_to_file);
        let message = report.detail.as_deref().unwrap_or("");
        match report.kind {
            ChangeKind::Conflict => format!("Conflict in {target}: {message}"),
            ChangeKind::Changed => format!("Resolved note on {target}: {message}"),
            _ => format!("{} on {target}: {message}", report.action_label),
        }
    }
}

fn load(content: &MaterializedFile) -> HandlerResult<NotesDocument> {
    let text = content.read_to_string()?;
    NotesDocument::parse(content.logical_path(), &text)
        .map_err(|err| HandlerError::content(content.logical_path(), err.to_string()))
}

fn parse_side(order: &MergeOrder, side: MergeSide) -> Result<NotesDocument, MergeFailure> {
    let text = order.read_text(side)?;
    NotesDocument::parse(&order.situation.path_in_repo, &text).map_err(|err| {
        MergeFailure::Content {
            path: order.situation.path_in_repo.clone(),
            message: err.to_string(),
        }
    })
}

fn report_for(file: &FileInRevision, annotation: &Annotation) -> ChangeReport {
    let (kind, label) = if annotation.is_conflict() {
        (ChangeKind::Conflict, "Conflict")
    } else {
        (ChangeKind::Added, "Added note")
    };
    ChangeReport::new(ID, kind, label, file.clone())
        .with_signature(&annotation.id)
        .with_detail(format!("{}: {}", annotation.target, annotation.message))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use concord_api::{FileAction, RevisionNumber};
    use concord_handler_api::MergeSituation;
    use tempfile::TempDir;

    use super::*;
    use crate::notes::MERGE_CONFLICT_CLASS;

    struct Fixed(Vec<(String, String)>);

    impl FileRetriever for Fixed {
        fn materialize(&self, file: &FileInRevision) -> HandlerResult<MaterializedFile> {
            let (_, text) = self
                .0
                .iter()
                .find(|(rev, _)| rev == file.revision.as_str())
                .ok_or_else(|| HandlerError::content(&file.path, "missing"))?;
            MaterializedFile::from_bytes(&file.path, text.as_bytes()).map_err(|source| {
                HandlerError::Io {
                    path: file.path.clone(),
                    source,
                }
            })
        }
    }

    fn document(annotations: &[Annotation]) -> String {
        NotesDocument {
            annotations: annotations.to_vec(),
            ..NotesDocument::default()
        }
        .to_json()
        .expect("json")
    }

    fn conflict(id: &str) -> Annotation {
        Annotation {
            id: id.into(),
            ..Annotation::new(MERGE_CONFLICT_CLASS, "dog", "both edited the gloss")
        }
    }

    #[test]
    fn reports_new_conflicts_only() -> HandlerResult<()> {
        let old = conflict("c-1");
        let retriever = Fixed(vec![
            ("p".into(), document(&[old.clone()])),
            ("c".into(), document(&[old, conflict("c-2")])),
        ]);
        let parent = FileInRevision::parent_of("lexicon.dict.notes", RevisionNumber::new("p"));
        let child = FileInRevision::new("c".into(), "lexicon.dict.notes", FileAction::Modified);

        let reports = ConflictNotesHandler.two_way_diff(&parent, &child, &retriever)?;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, ChangeKind::Conflict);
        assert_eq!(reports[0].signature.as_deref(), Some("c-2"));
        assert_eq!(
            ConflictNotesHandler.present(&reports[0]),
            "Conflict in lexicon.dict: dog: both edited the gloss"
        );
        Ok(())
    }

    #[test]
    fn reports_resolution() -> HandlerResult<()> {
        let open = conflict("c-1");
        let mut closed = open.clone();
        closed.resolved = true;
        let retriever = Fixed(vec![
            ("p".into(), document(&[open])),
            ("c".into(), document(&[closed])),
        ]);
        let parent = FileInRevision::parent_of("a.notes", RevisionNumber::new("p"));
        let child = FileInRevision::new("c".into(), "a.notes", FileAction::Modified);

        let reports = ConflictNotesHandler.two_way_diff(&parent, &child, &retriever)?;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].action_label, "Resolved");
        Ok(())
    }

    #[test]
    fn malformed_notes_are_content_errors() {
        let content = MaterializedFile::from_bytes("a.notes", b"{").expect("materialize");
        let file = FileInRevision::new("c".into(), "a.notes", FileAction::Added);
        assert!(matches!(
            ConflictNotesHandler.describe_initial_contents(&file, &content),
            Err(HandlerError::Content { .. })
        ));
    }

    #[test]
    fn merge_unions_annotations() -> Result<(), MergeFailure> {
        let temp = TempDir::new().expect("tempdir");
        let shared = conflict("shared");
        let write = |name: &str, annotations: &[Annotation]| {
            let path = temp.path().join(name);
            fs::write(&path, document(annotations)).expect("write");
            path
        };
        let ancestor = write("ancestor", &[shared.clone()]);
        let ours = write("ours", &[shared.clone(), conflict("mine")]);
        let theirs = write("theirs", &[shared, conflict("yours")]);
        let order = MergeOrder::new(
            &ours,
            theirs,
            ancestor,
            MergeSituation::new("lexicon.dict.notes", "alice", "bob"),
        );

        let outcome = ConflictNotesHandler.three_way_merge(&order)?;
        assert!(!outcome.has_conflicts());

        let merged = NotesDocument::parse("ours", &fs::read_to_string(&ours).expect("read"))
            .expect("parse merged");
        let ids: Vec<&str> = merged.annotations.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["shared", "mine", "yours"]);
        Ok(())
    }

    #[test]
    fn merge_refuses_malformed_input_and_keeps_ours() {
        let temp = TempDir::new().expect("tempdir");
        let ours = temp.path().join("ours");
        fs::write(&ours, document(&[conflict("mine")])).expect("write");
        let theirs = temp.path().join("theirs");
        fs::write(&theirs, "garbage").expect("write");
        let ancestor = temp.path().join("ancestor");
        fs::write(&ancestor, document(&[])).expect("write");
        let before = fs::read_to_string(&ours).expect("read");

        let order = MergeOrder::new(
            &ours,
            theirs,
            ancestor,
            MergeSituation::new("a.notes", "alice", "bob"),
        );
        assert!(matches!(
            ConflictNotesHandler.three_way_merge(&order),
            Err(MergeFailure::Content { .. })
        ));
        assert_eq!(fs::read_to_string(&ours).expect("read"), before);
    }
}
