//! treeseal-core: shared types for the treeseal workspace
//!
//! - [`tree`]: the generic ordered document tree every format store maps into
//! - [`error`]: the error taxonomy surfaced by the engine and key backends
//! - [`config`]: `treeseal.toml` schema
//! - [`timestamp`]: the fixed timestamp format persisted in metadata

pub mod config;
pub mod error;
pub mod timestamp;
pub mod tree;

pub use error::{BackendError, ErrorClass, TreesealError, TreesealResult};
pub use tree::{PathSegment, Scalar, ScalarKind, TreeBranch, TreeItem, TreePath, Value};
