//! Three-way merge dispatch with conflict recording.

use std::sync::Arc;

use tracing::{info, warn};

use concord_handler_api::{HandlerRegistry, MergeOrder, MergeOutcome};
use concord_handlers::notes::{Annotation, MERGE_CONFLICT_CLASS};

use crate::notes::AnnotationCache;
use crate::Result;

/// Runs merges through the handler owning each file and keeps a record of
/// their conflicts next to the merged file.
#[derive(Clone)]
pub struct MergeService {
    registry: Arc<HandlerRegistry>,
    cache: Arc<AnnotationCache>,
}

impl MergeService {
    /// Create a merge service.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>, cache: Arc<AnnotationCache>) -> Self {
        Self { registry, cache }
    }

    /// Merge `order.theirs` into `order.ours`.
    ///
    /// Each conflict in the outcome is added to the notes store of the merged
    /// file, which is then saved. When both side revisions are known they are
    /// named in the annotation text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Merge`] when the handler cannot produce a result
    /// (including when no handler claims the file), or an annotation error
    /// when conflicts cannot be recorded.
    pub fn merge_file(&self, order: &MergeOrder) -> Result<MergeOutcome> {
        let path = &order.situation.path_in_repo;
        let handler = self.registry.resolve(path);
        let outcome = handler.three_way_merge(order).inspect_err(|err| {
            warn!(path = %path, handler = handler.id(), error = %err, "merge failed");
        })?;

        for warning in &outcome.warnings {
            warn!(path = %path, "{warning}");
        }
        if outcome.has_conflicts() {
            let notes = self.cache.get_repository(path)?;
            for conflict in &outcome.conflicts {
                let message = match (
                    &order.situation.ours_revision,
                    &order.situation.theirs_revision,
                ) {
                    (Some(ours), Some(theirs)) => format!(
                        "{} (merging {} into {})",
                        conflict.description,
                        theirs.short(),
                        ours.short()
                    ),
                    _ => conflict.description.clone(),
                };
                let annotation = Annotation::new(MERGE_CONFLICT_CLASS, &conflict.context, message)
                    .with_author(&conflict.winner);
                notes.add_annotation(annotation);
            }
            notes.save()?;
        }
        info!(
            path = %path,
            handler = handler.id(),
            conflicts = outcome.conflicts.len(),
            "merged file"
        );
        Ok(outcome)
    }
}

impl std::fmt::Debug for MergeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeService")
            .field("registry", &self.registry)
            .field("root", &self.cache.root())
            .finish()
    }
}
