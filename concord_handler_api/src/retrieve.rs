use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::{Builder, NamedTempFile};
use tracing::trace;

use concord_api::FileInRevision;

use crate::types::{HandlerError, HandlerResult};

/// Source of historical file content, implemented by version-control backends.
pub trait FileRetriever: Send + Sync {
    /// Write the content of `file` to a scratch file owned by the caller.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot produce the content.
    fn materialize(&self, file: &FileInRevision) -> HandlerResult<MaterializedFile>;
}

/// Scratch copy of one file state. The file is removed when this is dropped.
#[derive(Debug)]
pub struct MaterializedFile {
    logical_path: String,
    temp: NamedTempFile,
}

impl MaterializedFile {
    /// Write `bytes` to a new scratch file that keeps the extension of `logical_path`.
    ///
    /// # Errors
    ///
    /// Returns any error from creating or writing the scratch file.
    pub fn from_bytes(logical_path: &str, bytes: &[u8]) -> io::Result<Self> {
        let suffix = Path::new(logical_path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        let mut temp = Builder::new()
            .prefix("concord-")
            .suffix(&suffix)
            .tempfile()?;
        temp.write_all(bytes)?;
        temp.flush()?;
        trace!(path = logical_path, scratch = %temp.path().display(), "materialized file");
        Ok(Self {
            logical_path: logical_path.to_owned(),
            temp,
        })
    }

    /// Repository path of the file this content belongs to.
    pub fn logical_path(&self) -> &str {
        &self.logical_path
    }

    /// Location of the scratch copy.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Raw bytes of the scratch copy.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Io`] when the scratch file cannot be read.
    pub fn read_bytes(&self) -> HandlerResult<Vec<u8>> {
        fs::read(self.temp.path()).map_err(|source| HandlerError::Io {
            path: self.logical_path.clone(),
            source,
        })
    }

    /// Content of the scratch copy as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Io`] on read failure and [`HandlerError::Content`]
    /// when the content is not UTF-8.
    pub fn read_to_string(&self) -> HandlerResult<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes)
            .map_err(|_| HandlerError::content(&self.logical_path, "content is not valid UTF-8"))
    }
}

/// Replace `target` with `bytes` by writing a sibling scratch file and renaming it.
///
/// # Errors
///
/// Returns any error from creating, writing, or persisting the scratch file.
/// `target` is left untouched on error.
pub fn write_atomically(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut scratch = NamedTempFile::new_in(dir)?;
    scratch.write_all(bytes)?;
    scratch.flush()?;
    scratch.persist(target).map_err(|err| err.error)?;
    trace!(target = %target.display(), bytes = bytes.len(), "replaced file atomically");
    Ok(())
}
