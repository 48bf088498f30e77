//! Standard-format-marker lexicon handler.
//!
//! A lexicon is a header followed by records. Each record starts at a `\lx`
//! (headword) marker and is keyed by its headword plus its `\hm` homograph
//! number, if any. Lines that do not start with a marker continue the
//! previous field.

use std::collections::{BTreeSet, HashMap};

use concord_api::{ChangeKind, ChangeReport, FileInRevision};
use concord_handler_api::{
    has_extension, FileRetriever, FormatHandler, HandlerError, HandlerResult, MaterializedFile,
    MergeConflict, MergeFailure, MergeOrder, MergeOutcome, MergeSide, MergeSituation,
};
use tracing::debug;

const ID: &str = "dictionary";
const RECORD_MARKER: &str = "lx";
const HOMOGRAPH_MARKER: &str = "hm";
const GLOSS_MARKER: &str = "ge";

/// Entry-level diff and merge for standard-format lexicons.
#[derive(Debug, Default)]
pub struct DictionaryHandler;

impl FormatHandler for DictionaryHandler {
    fn id(&self) -> &'static str {
        ID
    }

    fn label(&self) -> &'static str {
        "Dictionary (standard format)"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["dict", "sfm"]
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
        let before = load(&retriever.materialize(parent)?)?;
        let after = load(&retriever.materialize(child)?)?;
        let old_entries = before.by_key();

        let mut reports = Vec::new();
        for entry in &after.entries {
            let report = match old_entries.get(entry.key.as_str()) {
                None => ChangeReport::new(ID, ChangeKind::Added, "Added entry", child.clone()),
                Some(old) if *old == entry => continue,
                Some(old) => {
                    ChangeReport::new(ID, ChangeKind::Changed, "Changed entry", child.clone())
                        .with_detail(format!("changed {}", changed_markers(old, entry)))
                }
            };
            reports.push(report.with_signature(&entry.key).with_parent(parent.clone()));
        }

        let new_entries = after.by_key();
        for entry in &before.entries {
            if !new_entries.contains_key(entry.key.as_str()) {
                reports.push(
                    ChangeReport::new(ID, ChangeKind::Deleted, "Removed entry", child.clone())
                        .with_signature(&entry.key)
                        .with_parent(parent.clone()),
                );
            }
        }
        debug!(path = %child.path, reports = reports.len(), "diffed lexicon");
        Ok(reports)
    }

    fn describe_initial_contents(
        &self,
        file: &FileInRevision,
        content: &MaterializedFile,
    ) -> HandlerResult<Vec<ChangeReport>> {
        let lexicon = load(content)?;
        Ok(lexicon
            .entries
            .iter()
            .map(|entry| {
                let report = ChangeReport::new(ID, ChangeKind::Added, "Added entry", file.clone())
                    .with_signature(&entry.key);
                match entry.value_of(GLOSS_MARKER) {
                    Some(gloss) => report.with_detail(format!("gloss '{gloss}'")),
                    None => report,
                }
            })
            .collect())
    }

    fn three_way_merge(&self, order: &MergeOrder) -> Result<MergeOutcome, MergeFailure> {
        let ancestor = parse_side(order, MergeSide::Ancestor)?;
        let ours = parse_side(order, MergeSide::Ours)?;
        let theirs = parse_side(order, MergeSide::Theirs)?;

        let (merged, outcome) = merge_lexicons(&ancestor, &ours, &theirs, &order.situation);
        order.write_result(merged.render().as_bytes())?;
        debug!(
            path = %order.situation.path_in_repo,
            entries = merged.entries.len(),
            conflicts = outcome.conflicts.len(),
            "merged lexicon"
        );
        Ok(outcome)
    }

    fn present(&self, report: &ChangeReport) -> String {
        let key = report.signature.as_deref().unwrap_or("?");
        let file = report.child.file_name();
        let text = match report.kind {
            ChangeKind::Added => format!("Added entry '{key}' to {file}"),
            ChangeKind::Deleted => format!("Removed entry '{key}' from {file}"),
            ChangeKind::Changed => format!("Changed entry '{key}' in {file}"),
            _ => format!("{} '{key}' in {file}", report.action_label),
        };
        match &report.detail {
            Some(detail) => format!("{text} ({detail})"),
            None => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    marker: String,
    value: String,
}

#[derive(Debug, Clone)]
struct Entry {
    key: String,
    fields: Vec<Field>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Entry {
    fn from_fields(fields: Vec<Field>, line: usize) -> Result<Self, String> {
        let headword = fields
            .first()
            .map(|field| field.value.trim())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| format!("entry at line {line} has no headword"))?;
        let key = match fields.iter().find(|field| field.marker == HOMOGRAPH_MARKER) {
            Some(homograph) => format!("{headword}#{}", homograph.value.trim()),
            None => headword.to_owned(),
        };
        Ok(Self { key, fields })
    }

    fn value_of(&self, marker: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.marker == marker)
            .map(|field| field.value.as_str())
    }
}

#[derive(Debug, Clone, Default)]
struct Lexicon {
    header: Vec<String>,
    entries: Vec<Entry>,
}

impl Lexicon {
    fn parse(text: &str) -> Result<Self, String> {
        let mut lexicon = Self::default();
        let mut current: Option<(Vec<Field>, usize)> = None;

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim_end();
            if line.is_empty() {
                continue;
            }
            match parse_marker(line) {
                Some(field) if field.marker == RECORD_MARKER => {
                    if let Some((fields, start)) = current.take() {
                        lexicon.entries.push(Entry::from_fields(fields, start)?);
                    }
                    current = Some((vec![field], index + 1));
                }
                Some(field) => match current.as_mut() {
                    Some((fields, _)) => fields.push(field),
                    None => lexicon.header.push(line.to_owned()),
                },
                None => match current.as_mut().and_then(|(fields, _)| fields.last_mut()) {
                    Some(last) => {
                        if !last.value.is_empty() {
                            last.value.push(' ');
                        }
                        last.value.push_str(line.trim());
                    }
                    None => lexicon.header.push(line.to_owned()),
                },
            }
        }
        if let Some((fields, start)) = current {
            lexicon.entries.push(Entry::from_fields(fields, start)?);
        }

        let mut seen = BTreeSet::new();
        for entry in &lexicon.entries {
            if !seen.insert(entry.key.as_str()) {
                return Err(format!("duplicate entry '{}'", entry.key));
            }
        }
        Ok(lexicon)
    }

    fn by_key(&self) -> HashMap<&str, &Entry> {
        self.entries
            .iter()
            .map(|entry| (entry.key.as_str(), entry))
            .collect()
    }

    fn render(&self) -> String {
        let mut blocks: Vec<String> = Vec::new();
        if !self.header.is_empty() {
            blocks.push(self.header.join("\n"));
        }
        for entry in &self.entries {
            let lines: Vec<String> = entry
                .fields
                .iter()
                .map(|field| {
                    if field.value.is_empty() {
                        format!("\\{}", field.marker)
                    } else {
                        format!("\\{} {}", field.marker, field.value)
                    }
                })
                .collect();
            blocks.push(lines.join("\n"));
        }
        let mut text = blocks.join("\n\n");
        text.push('\n');
        text
    }
}

fn parse_marker(line: &str) -> Option<Field> {
    let rest = line.strip_prefix('\\')?;
    let (marker, value) = match rest.split_once(char::is_whitespace) {
        Some((marker, value)) => (marker, value.trim()),
        None => (rest, ""),
    };
    if marker.is_empty() {
        return None;
    }
    Some(Field {
        marker: marker.to_owned(),
        value: value.to_owned(),
    })
}

fn changed_markers(old: &Entry, new: &Entry) -> String {
    let markers: BTreeSet<&str> = old
        .fields
        .iter()
        .chain(&new.fields)
        .map(|field| field.marker.as_str())
        .collect();
    let values = |entry: &Entry, marker: &str| -> Vec<String> {
        entry
            .fields
            .iter()
            .filter(|field| field.marker == marker)
            .map(|field| field.value.clone())
            .collect()
    };
    markers
        .into_iter()
        .filter(|marker| values(old, *marker) != values(new, *marker))
        .map(|marker| format!("\\{marker}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn load(content: &MaterializedFile) -> HandlerResult<Lexicon> {
    let text = content.read_to_string()?;
    Lexicon::parse(&text).map_err(|message| HandlerError::content(content.logical_path(), message))
}

fn parse_side(order: &MergeOrder, side: MergeSide) -> Result<Lexicon, MergeFailure> {
    let text = order.read_text(side)?;
    Lexicon::parse(&text).map_err(|message| MergeFailure::Content {
        path: order.situation.path_in_repo.clone(),
        message: format!("{side:?} side: {message}"),
    })
}

fn merge_lexicons(
    ancestor: &Lexicon,
    ours: &Lexicon,
    theirs: &Lexicon,
    situation: &MergeSituation,
) -> (Lexicon, MergeOutcome) {
    let base = ancestor.by_key();
    let incoming = theirs.by_key();
    let local = ours.by_key();
    let mut outcome = MergeOutcome::clean();
    let mut merged = Lexicon {
        header: if ours.header == ancestor.header {
            theirs.header.clone()
        } else {
            ours.header.clone()
        },
        entries: Vec::new(),
    };

    for mine in &ours.entries {
        let key = mine.key.as_str();
        let kept = match (base.get(key), incoming.get(key)) {
            (_, Some(other)) if *other == mine => Some(mine),
            (Some(original), Some(other)) if *original == mine => Some(*other),
            (Some(original), Some(other)) if *original == *other => Some(mine),
            (_, Some(other)) => {
                outcome.conflicts.push(MergeConflict::new(
                    situation,
                    key,
                    format!(
                        "{} and {} both edited entry '{key}'",
                        situation.ours_label, situation.theirs_label
                    ),
                ));
                Some(if situation.we_win() { mine } else { *other })
            }
            (Some(original), None) if *original == mine => None,
            (Some(_), None) => {
                outcome.conflicts.push(MergeConflict {
                    winner: situation.ours_label.clone(),
                    ..MergeConflict::new(
                        situation,
                        key,
                        format!(
                            "{} edited entry '{key}' which {} removed; kept the edit",
                            situation.ours_label, situation.theirs_label
                        ),
                    )
                });
                Some(mine)
            }
            (None, None) => Some(mine),
        };
        if let Some(entry) = kept {
            merged.entries.push(entry.clone());
        }
    }

    for other in &theirs.entries {
        let key = other.key.as_str();
        if local.contains_key(key) {
            continue;
        }
        match base.get(key) {
            None => merged.entries.push(other.clone()),
            Some(original) if *original == other => {}
            Some(_) => {
                outcome.conflicts.push(MergeConflict {
                    winner: situation.theirs_label.clone(),
                    ..MergeConflict::new(
                        situation,
                        key,
                        format!(
                            "{} edited entry '{key}' which {} removed; kept the edit",
                            situation.theirs_label, situation.ours_label
                        ),
                    )
                });
                merged.entries.push(other.clone());
            }
        }
    }

    (merged, outcome)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use concord_api::{FileAction, RevisionNumber};
    use concord_handler_api::ConflictHandling;
    use tempfile::TempDir;

    use super::*;

    const BASE: &str = "\\_sh v3.0  400  MDF 4.0\n\n\\lx dog\n\\ps n\n\\ge dog\n\n\\lx cat\n\\ps n\n\\ge cat\n";

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
            FileInRevision::parent_of("lexicon.dict", RevisionNumber::new("p")),
            FileInRevision::new("c".into(), "lexicon.dict", FileAction::Modified),
        )
    }

    #[test]
    fn parses_header_records_and_continuations() {
        let lexicon = Lexicon::parse("\\_sh v3.0\n\\lx dog\n\\hm 2\n\\ge a\nfour-legged friend\n")
            .expect("parse");
        assert_eq!(lexicon.header, ["\\_sh v3.0"]);
        assert_eq!(lexicon.entries.len(), 1);
        assert_eq!(lexicon.entries[0].key, "dog#2");
        assert_eq!(
            lexicon.entries[0].value_of(GLOSS_MARKER),
            Some("a four-legged friend")
        );
    }

    #[test]
    fn duplicate_and_empty_headwords_are_rejected() {
        assert!(Lexicon::parse("\\lx dog\n\\lx dog\n")
            .unwrap_err()
            .contains("duplicate entry 'dog'"));
        assert!(Lexicon::parse("\\lx\n\\ge nothing\n")
            .unwrap_err()
            .contains("no headword"));
    }

    #[test]
    fn diff_reports_per_entry() -> HandlerResult<()> {
        let new = "\\_sh v3.0  400  MDF 4.0\n\n\\lx dog\n\\ps n\n\\ge hound\n\n\\lx bird\n\\ge bird\n";
        let (parent, child) = files();

        let reports = DictionaryHandler.two_way_diff(&parent, &child, &Pair(BASE, new))?;

        let summary: Vec<(ChangeKind, &str)> = reports
            .iter()
            .map(|r| (r.kind, r.signature.as_deref().unwrap_or("")))
            .collect();
        assert_eq!(
            summary,
            [
                (ChangeKind::Changed, "dog"),
                (ChangeKind::Added, "bird"),
                (ChangeKind::Deleted, "cat"),
            ]
        );
        assert_eq!(reports[0].detail.as_deref(), Some("changed \\ge"));
        assert_eq!(
            DictionaryHandler.present(&reports[0]),
            "Changed entry 'dog' in lexicon.dict (changed \\ge)"
        );
        Ok(())
    }

    #[test]
    fn unchanged_lexicon_yields_no_reports() -> HandlerResult<()> {
        let (parent, child) = files();
        let reformatted = BASE.replace("\n\n", "\n");
        let reports = DictionaryHandler.two_way_diff(&parent, &child, &Pair(BASE, &reformatted))?;
        assert!(reports.is_empty());
        Ok(())
    }

    #[test]
    fn initial_contents_lists_entries() -> HandlerResult<()> {
        let content = MaterializedFile::from_bytes("lexicon.dict", BASE.as_bytes())
            .expect("materialize");
        let file = FileInRevision::new("c".into(), "lexicon.dict", FileAction::Added);
        let reports = DictionaryHandler.describe_initial_contents(&file, &content)?;
        assert_eq!(reports.len(), 2);
        assert_eq!(
            DictionaryHandler.present(&reports[1]),
            "Added entry 'cat' to lexicon.dict (gloss 'cat')"
        );
        Ok(())
    }

    fn merge(ours: &str, theirs: &str, handling: ConflictHandling) -> (String, MergeOutcome) {
        let temp = TempDir::new().expect("tempdir");
        let path = |name: &str, text: &str| {
            let path = temp.path().join(name);
            fs::write(&path, text).expect("write");
            path
        };
        let order = MergeOrder::new(
            path("ours.dict", ours),
            path("theirs.dict", theirs),
            path("ancestor.dict", BASE),
            MergeSituation::new("lexicon.dict", "alice", "bob").with_conflict_handling(handling),
        );
        let outcome = DictionaryHandler.three_way_merge(&order).expect("merge");
        (fs::read_to_string(&order.ours).expect("read"), outcome)
    }

    #[test]
    fn merge_combines_independent_edits() {
        let ours = BASE.replace("\\ge dog", "\\ge hound");
        let theirs = format!("{BASE}\n\\lx bird\n\\ge bird\n");
        let (merged, outcome) = merge(&ours, &theirs, ConflictHandling::WeWin);

        assert!(!outcome.has_conflicts());
        assert!(merged.contains("\\ge hound"));
        assert!(merged.contains("\\lx bird"));
        assert!(merged.starts_with("\\_sh v3.0"));
    }

    #[test]
    fn conflicting_edits_follow_conflict_handling() {
        let ours = BASE.replace("\\ge cat", "\\ge kitty");
        let theirs = BASE.replace("\\ge cat", "\\ge feline");

        let (merged, outcome) = merge(&ours, &theirs, ConflictHandling::TheyWin);
        assert!(merged.contains("\\ge feline"));
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].context, "cat");
        assert_eq!(outcome.conflicts[0].winner, "bob");
    }

    #[test]
    fn edit_beats_removal() {
        let ours = BASE.replace("\\ge cat", "\\ge kitty");
        let theirs = "\\_sh v3.0  400  MDF 4.0\n\n\\lx dog\n\\ps n\n\\ge dog\n";
        let (merged, outcome) = merge(&ours, theirs, ConflictHandling::TheyWin);

        assert!(merged.contains("\\ge kitty"));
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].winner, "alice");
    }

    #[test]
    fn clean_removal_is_applied() {
        let theirs = "\\_sh v3.0  400  MDF 4.0\n\n\\lx dog\n\\ps n\n\\ge dog\n";
        let (merged, outcome) = merge(BASE, theirs, ConflictHandling::WeWin);
        assert!(!merged.contains("\\lx cat"));
        assert!(!outcome.has_conflicts());
    }
}
