//! Core library for Concord's format-aware history and merge engine.
//!
//! The crate is layered around three primary responsibilities:
//! - reading revisions and historical file content from a backend
//! - turning a revision into format-aware change reports
//! - dispatching three-way merges and recording their conflicts

#![warn(
    clippy::all,
    clippy::cargo,
    clippy::nursery,
    clippy::pedantic,
    missing_docs
)]
#![cfg_attr(
    not(test),
    deny(
        clippy::dbg_macro,
        clippy::expect_used,
        clippy::panic,
        clippy::print_stderr,
        clippy::print_stdout,
        clippy::todo,
        clippy::unwrap_used
    )
)]

/// Version-control backends and the revision model.
pub mod backend;
/// `concord.toml` loading and registry construction.
pub mod config;
/// Revision scans producing change reports.
pub mod inspector;
/// Three-way merge dispatch.
pub mod merge;
/// Annotation store lookup shared by handlers and tools.
pub mod notes;

use concord_api::FileAction;
use concord_handler_api::MergeFailure;
use concord_handlers::notes::NotesError;

/// Common result type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the core library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying git operation failed.
    #[error("git error: {source}")]
    Git {
        /// Original libgit2 error bubbled up by the core library.
        #[from]
        source: git2::Error,
    },
    /// Provided path does not correspond to a git repository.
    #[error("path does not reference a git repository: {path}")]
    NotARepository {
        /// Path that failed to resolve to a repository.
        path: String,
    },
    /// Bare repositories have no working tree to annotate.
    #[error("repository at {path} is bare and unsupported")]
    BareRepository {
        /// Path of the repository lacking a working tree.
        path: String,
    },
    /// Filesystem interaction failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Filesystem path involved in the failed operation.
        path: String,
        /// Source I/O error returned by the standard library.
        #[source]
        source: std::io::Error,
    },
    /// A revision or one of its parents is unknown to the backend.
    #[error("revision not found: {revision}")]
    RevisionNotFound {
        /// Revision spec or number that failed to resolve.
        revision: String,
    },
    /// A file carried an action tag that cannot occur inside a revision.
    #[error("unexpected action '{}' for {path} in a revision listing", action.as_str())]
    UnexpectedAction {
        /// Repository path of the offending file.
        path: String,
        /// Tag that was found.
        action: FileAction,
    },
    /// Annotations were requested for a file that does not exist.
    #[error("cannot annotate missing file {path}")]
    MissingAnnotatedFile {
        /// Path of the missing file.
        path: String,
    },
    /// An annotation store could not be read or written.
    #[error(transparent)]
    Notes(#[from] NotesError),
    /// A three-way merge produced no usable output.
    #[error(transparent)]
    Merge(#[from] MergeFailure),
    /// Configuration was invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
    /// A scan was cancelled between file dispatches.
    #[error("operation cancelled")]
    Cancelled,
}
