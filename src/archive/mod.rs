//! Archive format detection and remote extraction.

pub mod extract;
pub mod kind;

pub use extract::{extract, ExtractOptions, ExtractReport, ExtractTool};
pub use kind::{split_stem, ArchiveKind};
