//! Metadata block stored alongside an encrypted document
//!
//! ```text
//! sops:
//!   version: "1.0"
//!   unencrypted_suffix: _unencrypted
//!   lastmodified: 2024-01-02T03:04:05Z
//!   mac: ENC[AES256_GCM,...,type:str]
//!   kms: [{arn, role?, enc, created_at}]
//!   pgp: [{fp, enc, created_at}]
//!   age: [{recipient, enc, created_at}]
//! ```

use chrono::{DateTime, Utc};
use treeseal_core::{timestamp, Scalar, TreeBranch, TreesealError, TreesealResult, Value};
use treeseal_keys::{KeyKind, KeySource, MasterKey};

/// Reserved top-level key holding the metadata block.
pub const METADATA_KEY: &str = "sops";

pub const FORMAT_VERSION: &str = "1.0";

pub const DEFAULT_UNENCRYPTED_SUFFIX: &str = "_unencrypted";

#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub version: String,
    pub unencrypted_suffix: String,
    pub last_modified: DateTime<Utc>,
    /// Encrypted MAC envelope, bound to `last_modified`.
    pub mac: String,
    pub key_sources: Vec<KeySource>,
}

impl Metadata {
    /// Number of master keys across all sources.
    pub fn key_count(&self) -> usize {
        self.key_sources.iter().map(|s| s.keys.len()).sum()
    }

    pub fn master_keys(&self) -> impl Iterator<Item = &MasterKey> {
        self.key_sources.iter().flat_map(|s| s.keys.iter())
    }

    pub fn to_tree(&self) -> TreeBranch {
        let mut tree = TreeBranch::new();
        tree.insert("version", self.version.as_str());
        tree.insert("unencrypted_suffix", self.unencrypted_suffix.as_str());
        tree.insert("lastmodified", timestamp::format(&self.last_modified));
        tree.insert("mac", self.mac.as_str());

        for kind in KeyKind::ALL {
            let mut sources = self.key_sources.iter().filter(|s| s.kind == kind).peekable();
            if sources.peek().is_none() {
                continue;
            }
            let entries: Vec<Value> = sources
                .flat_map(|s| s.keys.iter())
                .map(|k| Value::Branch(k.to_map()))
                .collect();
            tree.insert(kind.as_str(), entries);
        }
        tree
    }

    /// Parse a metadata block. Bad key entries are skipped; the load fails
    /// only when no usable master key is left.
    pub fn from_tree(tree: &TreeBranch) -> TreesealResult<Self> {
        let version = required_str(tree, "version")?;
        let unencrypted_suffix = match tree.get("unencrypted_suffix") {
            None | Some(Value::Null) => DEFAULT_UNENCRYPTED_SUFFIX.to_owned(),
            Some(Value::Scalar(Scalar::Str(s))) => s.clone(),
            Some(_) => {
                return Err(TreesealError::MalformedMetadata(
                    "field \"unencrypted_suffix\" is not a string".into(),
                ))
            }
        };
        let last_modified = timestamp::parse(&required_str(tree, "lastmodified")?)?;
        let mac = required_str(tree, "mac")?;

        let mut key_sources = Vec::new();
        let mut entries_seen = 0usize;
        let mut last_error = None;

        for item in tree.iter() {
            let Ok(kind) = item.key.parse::<KeyKind>() else {
                if !matches!(
                    item.key.as_str(),
                    "version" | "unencrypted_suffix" | "lastmodified" | "mac"
                ) {
                    tracing::debug!(field = %item.key, "ignoring unknown metadata field");
                }
                continue;
            };

            let entries: &[Value] = match &item.value {
                Value::Sequence(entries) => entries,
                Value::Null => &[],
                _ => {
                    return Err(TreesealError::MalformedMetadata(format!(
                        "key source {kind} is not a list"
                    )))
                }
            };

            let mut source = KeySource::new(kind);
            for (index, entry) in entries.iter().enumerate() {
                entries_seen += 1;
                let parsed = match entry {
                    Value::Branch(map) => MasterKey::from_map(kind, map),
                    _ => Err(TreesealError::MalformedKeyEntry {
                        kind: kind.to_string(),
                        reason: "entry is not a mapping".into(),
                    }),
                };
                match parsed {
                    Ok(key) => source.keys.push(key),
                    Err(e) => {
                        tracing::warn!(kind = %kind, index, error = %e, "skipping unusable key entry");
                        last_error = Some(e);
                    }
                }
            }
            key_sources.push(source);
        }

        let metadata = Self {
            version,
            unencrypted_suffix,
            last_modified,
            mac,
            key_sources,
        };

        if metadata.key_count() == 0 {
            return Err(last_error.unwrap_or(TreesealError::NoKeyAvailable {
                action: "load",
                attempts: entries_seen,
                last: None,
            }));
        }
        Ok(metadata)
    }
}

fn required_str(tree: &TreeBranch, field: &str) -> TreesealResult<String> {
    match tree.get(field) {
        Some(Value::Scalar(Scalar::Str(s))) => Ok(s.clone()),
        Some(_) => Err(TreesealError::MalformedMetadata(format!(
            "field {field:?} is not a string"
        ))),
        None => Err(TreesealError::MalformedMetadata(format!(
            "missing field {field:?}"
        ))),
    }
}
