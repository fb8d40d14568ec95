//! Format stores: native document syntax <-> [`TreeBranch`]
//!
//! A store only implements parsing and emitting whole documents; splitting
//! off and re-attaching the metadata block under [`METADATA_KEY`] is shared.

mod json;
mod yaml;

pub use json::JsonStore;
pub use yaml::YamlStore;

use std::path::Path;

use treeseal_core::{TreeBranch, TreesealError, TreesealResult, Value};

use crate::metadata::{Metadata, METADATA_KEY};

pub trait Store: Send + Sync {
    fn name(&self) -> &'static str;

    /// Parse a whole document, metadata block included.
    fn parse_document(&self, text: &str) -> TreesealResult<TreeBranch>;

    fn emit_document(&self, tree: &TreeBranch) -> TreesealResult<String>;

    /// Parse the document tree, without its metadata block.
    fn load(&self, text: &str) -> TreesealResult<TreeBranch> {
        let mut tree = self.parse_document(text)?;
        tree.remove(METADATA_KEY);
        Ok(tree)
    }

    fn dump(&self, tree: &TreeBranch) -> TreesealResult<String> {
        self.emit_document(tree)
    }

    fn load_metadata(&self, text: &str) -> TreesealResult<Metadata> {
        let tree = self.parse_document(text)?;
        match tree.get(METADATA_KEY) {
            Some(Value::Branch(block)) => Metadata::from_tree(block),
            Some(_) => Err(TreesealError::MalformedMetadata(format!(
                "{METADATA_KEY:?} is not a mapping"
            ))),
            None => Err(TreesealError::MetadataNotFound),
        }
    }

    /// Emit `tree` with `metadata` appended as the last top-level key.
    fn dump_with_metadata(&self, tree: &TreeBranch, metadata: &Metadata) -> TreesealResult<String> {
        let mut document = tree.clone();
        document.remove(METADATA_KEY);
        document.insert(METADATA_KEY, metadata.to_tree());
        self.emit_document(&document)
    }
}

/// Pick a store from the file extension.
pub fn store_for_path(path: &Path) -> TreesealResult<Box<dyn Store>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("yaml" | "yml") => Ok(Box::new(YamlStore)),
        Some("json") => Ok(Box::new(JsonStore)),
        _ => Err(TreesealError::Parse(format!(
            "no store for {}: expected .yaml, .yml or .json",
            path.display()
        ))),
    }
}
