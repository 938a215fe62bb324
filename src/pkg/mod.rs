//! Package loading, traversal and emission
//!
//! A package is a directory with a Kptfile at its root. This module handles:
//! - [`tree`]: post-order enumeration of a package and its subpackages
//! - [`reader`]: loading a directory into an ordered, annotated resource set
//! - [`writer`]: emitting a (possibly mutated) resource set back to disk

pub mod reader;
pub mod tree;
pub mod writer;

pub use reader::{read_package, OpaqueBlob, PackageContents, ReaderOptions, SourceDocument};
pub use tree::{walk, PackageNode};
pub use writer::{write_package, WriteOptions, WriteSummary};

/// Name of the per-package ignore file; one glob per line.
pub const IGNORE_FILE_NAME: &str = ".krmignore";
