//! Shared Concord data models consumed by the core library and handler crates.

pub mod report;
pub mod revision;

pub use report::*;
pub use revision::*;
