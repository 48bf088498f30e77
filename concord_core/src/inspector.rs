//! Turns a revision into the change reports format handlers produce for it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use concord_api::{ChangeReport, FileAction, FileInRevision, RevisionNumber};
use concord_handler_api::{FormatHandler, HandlerRegistry, HandlerResult};

use crate::backend::{Backend, Revision};
use crate::{Error, Result};

/// Shape of a revision, decided from its parent count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckinKind {
    /// No parents.
    Initial,
    /// Exactly one parent.
    LinearEdit,
    /// Two or more parents.
    Merge,
}

impl CheckinKind {
    const fn from_parent_count(count: usize) -> Self {
        match count {
            0 => Self::Initial,
            1 => Self::LinearEdit,
            _ => Self::Merge,
        }
    }
}

/// Computes change reports for revisions.
///
/// Scans are independent of each other; the inspector holds no per-scan state
/// and can be shared across threads.
#[derive(Clone)]
pub struct RevisionInspector {
    backend: Arc<dyn Backend>,
    registry: Arc<HandlerRegistry>,
}

impl RevisionInspector {
    /// Create an inspector over `backend` resolving handlers from `registry`.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, registry: Arc<HandlerRegistry>) -> Self {
        Self { backend, registry }
    }

    /// Registry used for handler resolution.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Classify `revision` by its parents, resolving them if needed.
    ///
    /// # Errors
    ///
    /// Propagates parent resolution failures.
    pub fn classify(&self, revision: &Revision) -> Result<CheckinKind> {
        let parents = revision.resolve_parents(self.backend.as_ref())?;
        Ok(CheckinKind::from_parent_count(parents.len()))
    }

    /// Change reports for `revision`.
    ///
    /// Files are dispatched once per parent. After a merge only conflict records
    /// are kept, without duplicates. A file whose content cannot be read or
    /// understood yields a single default error report instead of failing the scan.
    ///
    /// # Errors
    ///
    /// Returns an error when parents or files cannot be listed, or when the
    /// backend lists a file with a [`FileAction::Parent`] tag.
    pub fn get_change_records(&self, revision: &Revision) -> Result<Vec<ChangeReport>> {
        self.scan(revision, None)
    }

    /// Like [`RevisionInspector::get_change_records`], checking `cancelled`
    /// before each file dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] once the flag is observed set, plus every
    /// error of [`RevisionInspector::get_change_records`].
    pub fn get_change_records_cancellable(
        &self,
        revision: &Revision,
        cancelled: &AtomicBool,
    ) -> Result<Vec<ChangeReport>> {
        self.scan(revision, Some(cancelled))
    }

    /// Render `report` with the handler that produced it.
    #[must_use]
    pub fn present(&self, report: &ChangeReport) -> String {
        let handler = if report.is_default() {
            self.registry.default_handler()
        } else {
            self.registry.resolve(&report.path_to_file)
        };
        handler.present(report)
    }

    fn scan(
        &self,
        revision: &Revision,
        cancelled: Option<&AtomicBool>,
    ) -> Result<Vec<ChangeReport>> {
        let span = info_span!("scan", revision = %revision.number.short());
        let _enter = span.enter();

        let kind = self.classify(revision)?;
        let files = self.backend.files_in_revision(revision)?;
        let check_cancelled = || match cancelled {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(Error::Cancelled),
            _ => Ok(()),
        };

        let mut reports = Vec::new();
        if kind == CheckinKind::Initial {
            for file in &files {
                check_cancelled()?;
                reports.extend(self.dispatch(file, file.action, None)?);
            }
        } else {
            for (index, parent) in revision.parent_revision_numbers().iter().enumerate() {
                for file in &files {
                    check_cancelled()?;
                    let Some(action) = self.action_under(file, parent, index == 0)? else {
                        debug!(path = %file.path, parent = %parent.short(), "absent");
                        continue;
                    };
                    reports.extend(self.dispatch(file, action, Some(parent))?);
                }
            }
        }

        let raw = reports.len();
        if kind == CheckinKind::Merge {
            reports = self.keep_conflict_records(reports);
        }
        info!(
            ?kind,
            files = files.len(),
            raw,
            reports = reports.len(),
            "scanned revision"
        );
        Ok(reports)
    }

    /// What happened to `file` relative to `parent`.
    ///
    /// Listed actions are relative to the first parent. Against any other parent
    /// the file may be new, gone or untouched, so its presence there decides.
    /// `None` means the path exists on neither side.
    fn action_under(
        &self,
        file: &FileInRevision,
        parent: &RevisionNumber,
        first_parent: bool,
    ) -> Result<Option<FileAction>> {
        if first_parent || file.action == FileAction::Parent {
            return Ok(Some(file.action));
        }
        let in_child = file.action != FileAction::Deleted;
        let in_parent = self.backend.contains_path(parent, &file.path)?;
        Ok(match (in_child, in_parent) {
            (true, true) => Some(FileAction::Modified),
            (true, false) => Some(FileAction::Added),
            (false, true) => Some(FileAction::Deleted),
            (false, false) => None,
        })
    }

    /// Dispatch one file against one parent (or none for an initial checkin).
    fn dispatch(
        &self,
        file: &FileInRevision,
        action: FileAction,
        parent: Option<&RevisionNumber>,
    ) -> Result<Vec<ChangeReport>> {
        let Some(handler) = self.handler_for(file) else {
            debug!(path = %file.path, action = action.as_str(), "no handler");
            return unhandled(file, action, parent).map(|report| vec![report]);
        };
        debug!(
            path = %file.path,
            handler = handler.id(),
            action = action.as_str(),
            "dispatching"
        );
        match self.run_handler(handler, file, action, parent) {
            Ok(reports) => Ok(reports),
            Err(err) => {
                warn!(
                    path = %file.path,
                    handler = handler.id(),
                    error = %err,
                    "contained failure"
                );
                Ok(vec![ChangeReport::default_error(
                    file.clone(),
                    &err.to_string(),
                )])
            }
        }
    }

    fn handler_for(&self, file: &FileInRevision) -> Option<&dyn FormatHandler> {
        let handler = self.registry.find(&file.path)?;
        if handler.max_file_size().is_none() && self.registry.size_limit().is_none() {
            return Some(handler);
        }
        self.registry
            .find_for_size(&file.path, self.backend.file_size(file))
    }

    fn run_handler(
        &self,
        handler: &dyn FormatHandler,
        file: &FileInRevision,
        action: FileAction,
        parent: Option<&RevisionNumber>,
    ) -> HandlerResult<Vec<ChangeReport>> {
        match (parent, action) {
            (Some(parent), FileAction::Modified) => {
                let before = FileInRevision::parent_of(file.path.clone(), parent.clone());
                handler.two_way_diff(&before, file, self.backend.retriever())
            }
            // Gone from the child: describe what this parent still had.
            (Some(parent), FileAction::Deleted) => {
                let before = FileInRevision::parent_of(file.path.clone(), parent.clone());
                let content = self.backend.materialize(&before)?;
                handler.describe_initial_contents(file, &content)
            }
            _ => {
                let content = self.backend.materialize(file)?;
                handler.describe_initial_contents(file, &content)
            }
        }
    }

    /// After a merge only conflict records are meaningful history.
    fn keep_conflict_records(&self, reports: Vec<ChangeReport>) -> Vec<ChangeReport> {
        let mut seen = HashSet::new();
        reports
            .into_iter()
            .filter(|report| {
                self.registry
                    .find(&report.path_to_file)
                    .is_some_and(|handler| handler.records_conflicts())
            })
            .filter(|report| seen.insert(report.clone()))
            .collect()
    }
}

impl std::fmt::Debug for RevisionInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionInspector")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn unhandled(
    file: &FileInRevision,
    action: FileAction,
    parent: Option<&RevisionNumber>,
) -> Result<ChangeReport> {
    match action {
        FileAction::Added => Ok(ChangeReport::default_added(file.clone())),
        FileAction::Deleted => Ok(ChangeReport::default_deleted(file.clone())),
        FileAction::Modified => Ok(ChangeReport::default_changed(
            file.clone(),
            parent.map(|parent| FileInRevision::parent_of(file.path.clone(), parent.clone())),
        )),
        FileAction::Parent => Err(Error::UnexpectedAction {
            path: file.path.clone(),
            action,
        }),
    }
}
