mod conflict_notes;
mod dictionary;
pub mod notes;
mod project_config;
mod text;

use std::sync::Arc;

pub use conflict_notes::ConflictNotesHandler;
pub use dictionary::DictionaryHandler;
pub use project_config::ProjectConfigHandler;
pub use text::TextHandler;

use concord_handler_api::{FormatHandler, HandlerRegistry};

/// Handlers shipped with Concord, in priority order.
///
/// Conflict notes come first so that `lexicon.dict.notes` is never claimed by
/// a handler matching a shorter suffix.
#[must_use]
pub fn installed_handlers() -> Vec<Arc<dyn FormatHandler>> {
    vec![
        Arc::new(ConflictNotesHandler),
        Arc::new(DictionaryHandler),
        Arc::new(ProjectConfigHandler),
        Arc::new(TextHandler),
    ]
}

/// Build a registry populated with every installed handler.
#[must_use]
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for handler in installed_handlers() {
        registry.register_arc(handler);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_resolves_by_extension() {
        let registry = default_registry();
        assert_eq!(registry.resolve("lexicon.dict.notes").id(), "conflict-notes");
        assert_eq!(registry.resolve("dict/lexicon.dict").id(), "dictionary");
        assert_eq!(registry.resolve("project.toml").id(), "project-config");
        assert_eq!(registry.resolve("README.md").id(), "text");
        assert_eq!(registry.resolve("audio/clip.wav").id(), "default");
        assert!(registry.find("audio/clip.wav").is_none());
    }

    #[test]
    fn only_notes_handler_records_conflicts() {
        let recording: Vec<&str> = installed_handlers()
            .iter()
            .filter(|handler| handler.records_conflicts())
            .map(|handler| handler.id())
            .collect();
        assert_eq!(recording, ["conflict-notes"]);
    }
}
