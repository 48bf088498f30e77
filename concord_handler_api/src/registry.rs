//! Ordered registry of format handlers with an implicit default fallback.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{DefaultHandler, FormatHandler};

/// Listing entry describing a registered handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerSummary {
    /// Stable handler id.
    pub id: String,
    /// Human-friendly label.
    pub label: String,
    /// Known extensions.
    pub extensions: Vec<String>,
}

/// Handlers probed in registration order; earlier registrations take priority.
///
/// The default handler is never part of the probed list, so it cannot shadow
/// a specific handler whatever the registration order.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn FormatHandler>>,
    fallback: DefaultHandler,
    size_limit: Option<u64>,
}

impl HandlerRegistry {
    /// Create an empty registry (every path resolves to the default handler).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the end of the priority list.
    pub fn register<H>(&mut self, handler: H)
    where
        H: FormatHandler + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    /// Append an already shared handler to the end of the priority list.
    pub fn register_arc(&mut self, handler: Arc<dyn FormatHandler>) {
        self.handlers.push(handler);
    }

    /// Cap applied to every handler on top of its own [`FormatHandler::max_file_size`].
    pub fn set_size_limit(&mut self, limit: Option<u64>) {
        self.size_limit = limit;
    }

    /// Registry-wide size cap, if any.
    pub const fn size_limit(&self) -> Option<u64> {
        self.size_limit
    }

    /// First handler claiming `path`, or `None` when only the default applies.
    pub fn find(&self, path: &str) -> Option<&dyn FormatHandler> {
        self.find_for_size(path, None)
    }

    /// Like [`HandlerRegistry::find`], also skipping handlers whose size limit `size` exceeds.
    pub fn find_for_size(&self, path: &str, size: Option<u64>) -> Option<&dyn FormatHandler> {
        let found = self
            .handlers
            .iter()
            .map(AsRef::as_ref)
            .find(|handler| handler.can_handle(path) && self.fits(*handler, size));
        trace!(path, handler = found.map(|h| h.id()), "resolved handler");
        found
    }

    /// Handler for `path`, falling back to the default handler.
    pub fn resolve(&self, path: &str) -> &dyn FormatHandler {
        self.find(path).unwrap_or(&self.fallback)
    }

    /// The implicit fallback handler.
    pub fn default_handler(&self) -> &dyn FormatHandler {
        &self.fallback
    }

    /// Registered handler ids in priority order.
    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.iter().map(|handler| handler.id())
    }

    /// Number of registered (non-default) handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no specific handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Summaries for all registered handlers in priority order.
    pub fn summaries(&self) -> Vec<HandlerSummary> {
        self.handlers
            .iter()
            .map(|handler| HandlerSummary {
                id: handler.id().to_owned(),
                label: handler.label().to_owned(),
                extensions: handler
                    .extensions()
                    .iter()
                    .map(|ext| (*ext).to_owned())
                    .collect(),
            })
            .collect()
    }

    /// The smaller of the handler's own limit and the registry cap applies; an
    /// unknown size always fits.
    fn fits(&self, handler: &dyn FormatHandler, size: Option<u64>) -> bool {
        let limit = match (handler.max_file_size(), self.size_limit) {
            (Some(own), Some(cap)) => Some(own.min(cap)),
            (own, cap) => own.or(cap),
        };
        match (size, limit) {
            (Some(size), Some(limit)) => size <= limit,
            _ => true,
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.ids().collect();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &ids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use concord_api::{ChangeReport, FileInRevision};

    use super::*;
    use crate::{
        has_extension, FileRetriever, HandlerResult, MaterializedFile, MergeFailure, MergeOrder,
        MergeOutcome,
    };

    struct Fake {
        id: &'static str,
        matches: fn(&str) -> bool,
        limit: Option<u64>,
    }

    impl FormatHandler for Fake {
        fn id(&self) -> &'static str {
            self.id
        }

        fn label(&self) -> &'static str {
            "Fake"
        }

        fn can_handle(&self, path: &str) -> bool {
            (self.matches)(path)
        }

        fn max_file_size(&self) -> Option<u64> {
            self.limit
        }

        fn two_way_diff(
            &self,
            _parent: &FileInRevision,
            _child: &FileInRevision,
            _retriever: &dyn FileRetriever,
        ) -> HandlerResult<Vec<ChangeReport>> {
            Ok(Vec::new())
        }

        fn describe_initial_contents(
            &self,
            _file: &FileInRevision,
            _content: &MaterializedFile,
        ) -> HandlerResult<Vec<ChangeReport>> {
            Ok(Vec::new())
        }

        fn three_way_merge(&self, _order: &MergeOrder) -> Result<MergeOutcome, MergeFailure> {
            Ok(MergeOutcome::clean())
        }

        fn present(&self, report: &ChangeReport) -> String {
            report.action_label.clone()
        }
    }

    fn dict_then_anything() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register(Fake {
            id: "a",
            matches: |path| has_extension(path, &["dict"]),
            limit: Some(10),
        });
        registry.register(Fake {
            id: "b",
            matches: |_| true,
            limit: None,
        });
        registry
    }

    #[test]
    fn first_registered_match_wins() {
        let registry = dict_then_anything();
        assert_eq!(registry.resolve("x.dict").id(), "a");
        assert_eq!(registry.resolve("x.txt").id(), "b");
    }

    #[test]
    fn unmatched_path_resolves_to_default() {
        let mut registry = HandlerRegistry::new();
        registry.register(Fake {
            id: "a",
            matches: |path| has_extension(path, &["dict"]),
            limit: None,
        });

        assert!(registry.find("readme.md").is_none());
        assert_eq!(registry.resolve("readme.md").id(), "default");
        assert!(registry.ids().all(|id| id != "default"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn size_limit_skips_handler() {
        let registry = dict_then_anything();
        assert_eq!(
            registry.find_for_size("x.dict", Some(11)).map(|h| h.id()),
            Some("b")
        );
        assert_eq!(
            registry.find_for_size("x.dict", Some(10)).map(|h| h.id()),
            Some("a")
        );
    }

    #[test]
    fn empty_registry_debug_and_summaries() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.summaries().is_empty());
        assert_eq!(
            format!("{registry:?}"),
            "HandlerRegistry { handlers: [] }"
        );
        assert!(registry.default_handler().can_handle("anything.bin"));
    }

    #[test]
    fn registry_limit_applies_to_every_handler() {
        let mut registry = dict_then_anything();
        registry.set_size_limit(Some(5));
        assert!(registry.find_for_size("x.txt", Some(6)).is_none());
        assert_eq!(
            registry.find_for_size("x.dict", Some(5)).map(|h| h.id()),
            Some("a")
        );
        assert_eq!(registry.find("x.txt").map(|h| h.id()), Some("b"));
    }

    #[test]
    fn smaller_limit_wins_and_unknown_size_fits() {
        let mut registry = dict_then_anything();
        registry.set_size_limit(Some(20));
        assert_eq!(
            registry.find_for_size("x.dict", Some(11)).map(|h| h.id()),
            Some("b")
        );
        assert!(registry.find_for_size("x.dict", Some(21)).is_none());
        assert_eq!(
            registry.find_for_size("x.dict", None).map(|h| h.id()),
            Some("a")
        );
    }
}
