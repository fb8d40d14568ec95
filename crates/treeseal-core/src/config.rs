use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{TreesealError, TreesealResult};

/// Top-level configuration (loaded from treeseal.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TreesealConfig {
    pub encryption: EncryptionConfig,
    pub keys: KeysConfig,
    pub backends: BackendsConfig,
    pub age: AgeConfig,
}

impl TreesealConfig {
    pub fn from_toml_str(content: &str) -> TreesealResult<Self> {
        toml::from_str(content).map_err(|e| TreesealError::Config(e.to_string()))
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn from_path(path: &Path) -> TreesealResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| TreesealError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Keys ending with this suffix are left in plaintext (default: "_unencrypted")
    pub unencrypted_suffix: String,
}

/// Master keys new documents are protected with
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    pub kms: Vec<KmsKeyConfig>,
    /// PGP fingerprints
    pub pgp: Vec<String>,
    /// age X25519 recipients (age1...)
    pub age: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmsKeyConfig {
    pub arn: String,
    /// Role to assume before calling KMS
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    /// Per-call timeout for wrap/unwrap in seconds, 0 disables (default: 30)
    pub timeout_secs: u64,
    /// Concurrent backend calls per operation (default: 4)
    pub max_concurrency: usize,
    /// gpg executable (default: "gpg")
    pub gpg_binary: String,
    /// GnuPG home directory override
    pub gpg_homedir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgeConfig {
    /// age identity file (default discovery ends at ~/.config/sops/age/keys.txt)
    pub identity: Option<PathBuf>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            unencrypted_suffix: "_unencrypted".into(),
        }
    }
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_concurrency: 4,
            gpg_binary: "gpg".into(),
            gpg_homedir: None,
        }
    }
}
