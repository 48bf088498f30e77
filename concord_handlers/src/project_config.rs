use std::collections::BTreeMap;

use concord_api::{ChangeKind, ChangeReport, FileInRevision};
use concord_handler_api::{
    has_extension, FileRetriever, FormatHandler, HandlerError, HandlerResult, MaterializedFile,
    MergeConflict, MergeFailure, MergeOrder, MergeOutcome, MergeSide, MergeSituation,
};
use toml::{Table, Value};
use tracing::debug;

const ID: &str = "project-config";

/// Key-level diff and merge for TOML project configuration files.
#[derive(Debug, Default)]
pub struct ProjectConfigHandler;

impl FormatHandler for ProjectConfigHandler {
    fn id(&self) -> &'static str {
        ID
    }

    fn label(&self) -> &'static str {
        "Project configuration (TOML)"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["toml"]
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
        let before = flatten(&load(&retriever.materialize(parent)?)?);
        let after = flatten(&load(&retriever.materialize(child)?)?);

        let mut reports = Vec::new();
        for (key, value) in &after {
            let report = match before.get(key) {
                None => ChangeReport::new(ID, ChangeKind::Added, "Added setting", child.clone())
                    .with_detail(format!("{key} = {value}")),
                Some(old) if old == value => continue,
                Some(old) => {
                    ChangeReport::new(ID, ChangeKind::Changed, "Changed setting", child.clone())
                        .with_detail(format!("{key}: {old} -> {value}"))
                }
            };
            reports.push(report.with_signature(key).with_parent(parent.clone()));
        }
        for key in before.keys().filter(|key| !after.contains_key(*key)) {
            reports.push(
                ChangeReport::new(ID, ChangeKind::Deleted, "Removed setting", child.clone())
                    .with_signature(key)
                    .with_detail(key.clone())
                    .with_parent(parent.clone()),
            );
        }
        Ok(reports)
    }

    fn describe_initial_contents(
        &self,
        file: &FileInRevision,
        content: &MaterializedFile,
    ) -> HandlerResult<Vec<ChangeReport>> {
        let table = load(content)?;
        let keys: Vec<&str> = table.keys().map(String::as_str).collect();
        Ok(vec![ChangeReport::new(
            ID,
            ChangeKind::Added,
            "Added configuration",
            file.clone(),
        )
        .with_detail(format!("sections: {}", keys.join(", ")))])
    }

    fn three_way_merge(&self, order: &MergeOrder) -> Result<MergeOutcome, MergeFailure> {
        let ancestor = parse_side(order, MergeSide::Ancestor)?;
        let ours = parse_side(order, MergeSide::Ours)?;
        let theirs = parse_side(order, MergeSide::Theirs)?;

        let mut outcome = MergeOutcome::clean();
        let merged = merge_tables(
            Some(&ancestor),
            &ours,
            &theirs,
            "",
            &order.situation,
            &mut outcome,
        );
        let text = toml::to_string(&merged).map_err(|err| MergeFailure::Content {
            path: order.situation.path_in_repo.clone(),
            message: err.to_string(),
        })?;
        order.write_result(text.as_bytes())?;
        debug!(
            path = %order.situation.path_in_repo,
            conflicts = outcome.conflicts.len(),
            "merged configuration"
        );
        Ok(outcome)
    }

    fn present(&self, report: &ChangeReport) -> String {
        let detail = report.detail.as_deref().unwrap_or_default();
        format!(
            "{} in {}: {detail}",
            report.action_label,
            report.child.file_name()
        )
    }
}

fn load(content: &MaterializedFile) -> HandlerResult<Table> {
    let text = content.read_to_string()?;
    text.parse::<Table>()
        .map_err(|err| HandlerError::content(content.logical_path(), err.to_string()))
}

fn parse_side(order: &MergeOrder, side: MergeSide) -> Result<Table, MergeFailure> {
    let text = order.read_text(side)?;
    text.parse::<Table>().map_err(|err| MergeFailure::Content {
        path: order.situation.path_in_repo.clone(),
        message: format!("{side:?} side: {err}"),
    })
}

/// Leaf values keyed by dotted path; arrays are leaves.
fn flatten(table: &Table) -> BTreeMap<String, Value> {
    fn walk(prefix: &str, table: &Table, out: &mut BTreeMap<String, Value>) {
        for (key, value) in table {
            let path = join_key(prefix, key);
            match value {
                Value::Table(inner) => walk(&path, inner, out),
                other => {
                    out.insert(path, other.clone());
                }
            }
        }
    }
    let mut out = BTreeMap::new();
    walk("", table, &mut out);
    out
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

fn merge_tables(
    ancestor: Option<&Table>,
    ours: &Table,
    theirs: &Table,
    prefix: &str,
    situation: &MergeSituation,
    outcome: &mut MergeOutcome,
) -> Table {
    let mut merged = Table::new();
    let keys = ours
        .keys()
        .chain(theirs.keys().filter(|key| !ours.contains_key(*key)));

    for key in keys {
        let base = ancestor.and_then(|table| table.get(key));
        let mine = ours.get(key);
        let other = theirs.get(key);
        let path = join_key(prefix, key);

        let kept = match (mine, other) {
            (Some(Value::Table(mine)), Some(Value::Table(other))) => {
                Some(Value::Table(merge_tables(
                    base.and_then(Value::as_table),
                    mine,
                    other,
                    &path,
                    situation,
                    outcome,
                )))
            }
            _ if mine == other => mine.cloned(),
            _ if base == mine => other.cloned(),
            _ if base == other => mine.cloned(),
            (Some(mine), Some(other)) => {
                outcome.conflicts.push(MergeConflict::new(
                    situation,
                    &path,
                    format!(
                        "{} and {} both changed '{path}'",
                        situation.ours_label, situation.theirs_label
                    ),
                ));
                let winner = if situation.we_win() { mine } else { other };
                Some(winner.clone())
            }
            (Some(edited), None) | (None, Some(edited)) => {
                let editor = if mine.is_some() {
                    &situation.ours_label
                } else {
                    &situation.theirs_label
                };
                outcome.conflicts.push(MergeConflict {
                    winner: editor.clone(),
                    ..MergeConflict::new(
                        situation,
                        &path,
                        format!(
                            "'{path}' was changed by {editor} and removed by the other side; \
                             kept the change"
                        ),
                    )
                });
                Some(edited.clone())
            }
            (None, None) => None,
        };
        if let Some(value) = kept {
            merged.insert(key.clone(), value);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use std::fs;

    use concord_api::{FileAction, RevisionNumber};
    use concord_handler_api::ConflictHandling;
    use tempfile::TempDir;

    use super::*;

    const BASE: &str = "[project]\nname = \"Tok Pisin\"\nwriting_system = \"tpi\"\n\n[sync]\nremote = \"usb\"\n";

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

    #[test]
    fn diff_reports_dotted_keys() -> HandlerResult<()> {
        let new = "[project]\nname = \"Tok Pisin\"\nwriting_system = \"tpi-Latn\"\n\n[ui]\nfont = \"Charis\"\n";
        let parent = FileInRevision::parent_of("project.toml", RevisionNumber::new("p"));
        let child = FileInRevision::new("c".into(), "project.toml", FileAction::Modified);

        let reports = ProjectConfigHandler.two_way_diff(&parent, &child, &Pair(BASE, new))?;
        let keys: Vec<(&str, ChangeKind)> = reports
            .iter()
            .map(|r| (r.signature.as_deref().unwrap_or(""), r.kind))
            .collect();
        assert_eq!(
            keys,
            [
                ("project.writing_system", ChangeKind::Changed),
                ("ui.font", ChangeKind::Added),
                ("sync.remote", ChangeKind::Deleted),
            ]
        );
        assert_eq!(
            ProjectConfigHandler.present(&reports[0]),
            "Changed setting in project.toml: project.writing_system: \"tpi\" -> \"tpi-Latn\""
        );
        Ok(())
    }

    #[test]
    fn invalid_toml_is_a_content_error() {
        let content = MaterializedFile::from_bytes("project.toml", b"[project\n").expect("write");
        let file = FileInRevision::new("c".into(), "project.toml", FileAction::Added);
        assert!(matches!(
            ProjectConfigHandler.describe_initial_contents(&file, &content),
            Err(HandlerError::Content { .. })
        ));
    }

    fn merge(ours: &str, theirs: &str, handling: ConflictHandling) -> (Table, MergeOutcome) {
        let temp = TempDir::new().expect("tempdir");
        let write = |name: &str, text: &str| {
            let path = temp.path().join(name);
            fs::write(&path, text).expect("write");
            path
        };
        let order = MergeOrder::new(
            write("ours.toml", ours),
            write("theirs.toml", theirs),
            write("ancestor.toml", BASE),
            MergeSituation::new("project.toml", "alice", "bob").with_conflict_handling(handling),
        );
        let outcome = ProjectConfigHandler.three_way_merge(&order).expect("merge");
        let merged = fs::read_to_string(&order.ours)
            .expect("read")
            .parse::<Table>()
            .expect("merged toml");
        (merged, outcome)
    }

    #[test]
    fn merge_combines_edits_in_different_tables() {
        let ours = BASE.replace("\"usb\"", "\"lan\"");
        let theirs = format!("{BASE}\n[ui]\nfont = \"Charis\"\n");
        let (merged, outcome) = merge(&ours, &theirs, ConflictHandling::WeWin);

        assert!(!outcome.has_conflicts());
        assert_eq!(merged["sync"]["remote"].as_str(), Some("lan"));
        assert_eq!(merged["ui"]["font"].as_str(), Some("Charis"));
    }

    #[test]
    fn conflicting_scalar_uses_winner() {
        let ours = BASE.replace("\"tpi\"", "\"tpi-Latn\"");
        let theirs = BASE.replace("\"tpi\"", "\"tpi-x-old\"");

        let (merged, outcome) = merge(&ours, &theirs, ConflictHandling::WeWin);
        assert_eq!(merged["project"]["writing_system"].as_str(), Some("tpi-Latn"));
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].context, "project.writing_system");
    }

    #[test]
    fn clean_removal_is_applied() {
        let theirs = "[project]\nname = \"Tok Pisin\"\nwriting_system = \"tpi\"\n";
        let (merged, outcome) = merge(BASE, theirs, ConflictHandling::WeWin);
        assert!(merged.get("sync").is_none());
        assert!(!outcome.has_conflicts());
    }
}
