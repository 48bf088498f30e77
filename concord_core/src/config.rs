//! `concord.toml` configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use concord_handler_api::HandlerRegistry;
use concord_handlers::{installed_handlers, notes::NOTES_EXTENSION};

use crate::{Error, Result};

/// Conventional file name, looked up at the repository root.
pub const CONFIG_FILE_NAME: &str = "concord.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcordConfig {
    /// Engine-wide settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Handler selection.
    #[serde(default)]
    pub handlers: HandlersConfig,
}

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tracing filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Extension of annotation stores.
    #[serde(default = "default_notes_extension")]
    pub notes_extension: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_notes_extension() -> String {
    NOTES_EXTENSION.into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            notes_extension: default_notes_extension(),
        }
    }
}

/// `[handlers]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlersConfig {
    /// Handler ids left out of the registry.
    #[serde(default)]
    pub disabled: Vec<String>,
    /// Files above this many bytes get default reports.
    #[serde(default)]
    pub max_file_size: Option<u64>,
}

impl ConcordConfig {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file cannot be read and [`Error::Config`]
    /// when it is invalid.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");
        let contents = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for malformed TOML, unknown handler ids or a
    /// notes extension the handlers do not use.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|err| Error::Config {
            message: err.to_string(),
        })?;
        config.validate()?;
        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Check handler ids and the notes extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let known: Vec<&str> = installed_handlers()
            .iter()
            .map(|handler| handler.id())
            .collect();
        if let Some(unknown) = self
            .handlers
            .disabled
            .iter()
            .find(|id| !known.contains(&id.as_str()))
        {
            return Err(Error::Config {
                message: format!(
                    "unknown handler '{unknown}' in handlers.disabled (known: {})",
                    known.join(", ")
                ),
            });
        }
        if self.engine.notes_extension != NOTES_EXTENSION {
            return Err(Error::Config {
                message: format!(
                    "engine.notes_extension must be '{NOTES_EXTENSION}', got '{}'",
                    self.engine.notes_extension
                ),
            });
        }
        Ok(())
    }

    /// Registry of enabled handlers in their usual priority order.
    #[must_use]
    pub fn build_registry(&self) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        for handler in installed_handlers() {
            if self.handlers.disabled.iter().any(|id| id == handler.id()) {
                debug!(handler = handler.id(), "handler disabled");
                continue;
            }
            registry.register_arc(handler);
        }
        registry.set_size_limit(self.handlers.max_file_size);
        registry
    }
}
