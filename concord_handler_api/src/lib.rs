mod default_handler;
mod registry;
mod retrieve;
mod types;

pub use default_handler::DefaultHandler;
pub use registry::{HandlerRegistry, HandlerSummary};
pub use retrieve::{write_atomically, FileRetriever, MaterializedFile};
pub use types::{
    has_extension, ConflictHandling, HandlerError, HandlerResult, MergeConflict, MergeFailure,
    MergeOrder, MergeOutcome, MergeSide, MergeSituation,
};

use concord_api::{ChangeReport, FileInRevision};

/// Trait implemented by format-aware file handlers (dictionary, text, config...).
///
/// Handlers are stateless strategies; one instance serves every revision.
pub trait FormatHandler: Send + Sync {
    /// Stable identifier used in reports and logs.
    fn id(&self) -> &'static str;

    /// Human-friendly label for listings.
    fn label(&self) -> &'static str;

    /// File extensions (without the dot) this handler knows about.
    fn extensions(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether this handler can process `path`. Must not touch the file.
    fn can_handle(&self, path: &str) -> bool;

    /// Files larger than this many bytes are left to the default handler.
    fn max_file_size(&self) -> Option<u64> {
        None
    }

    /// Whether this handler owns the conflict records kept after a merge.
    fn records_conflicts(&self) -> bool {
        false
    }

    /// Compare the `parent` state of a file with its `child` state.
    ///
    /// An empty result means no meaningful change.
    ///
    /// # Errors
    ///
    /// Returns an error when either side cannot be retrieved or parsed.
    fn two_way_diff(
        &self,
        parent: &FileInRevision,
        child: &FileInRevision,
        retriever: &dyn FileRetriever,
    ) -> HandlerResult<Vec<ChangeReport>>;

    /// Describe what a file introduces when there is no prior state to compare with.
    ///
    /// # Errors
    ///
    /// Returns an error when the content cannot be read or parsed.
    fn describe_initial_contents(
        &self,
        file: &FileInRevision,
        content: &MaterializedFile,
    ) -> HandlerResult<Vec<ChangeReport>>;

    /// Merge `theirs` into `ours` using `ancestor`, replacing `ours` on success.
    ///
    /// Unresolved conflicts are a successful outcome listing the conflicts.
    ///
    /// # Errors
    ///
    /// Returns [`MergeFailure`] when no usable output can be produced; `ours`
    /// is left untouched in that case.
    fn three_way_merge(&self, order: &MergeOrder) -> Result<MergeOutcome, MergeFailure>;

    /// Render a report this handler produced for humans.
    fn present(&self, report: &ChangeReport) -> String;
}
