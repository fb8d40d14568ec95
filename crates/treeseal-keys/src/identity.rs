//! age identity discovery chain

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use treeseal_core::config::AgeConfig;

/// A loaded age identity file (one or more private keys).
#[derive(Debug)]
pub struct IdentityProvider {
    pub key_data: SecretString,
    pub source: String,
}

impl IdentityProvider {
    pub fn from_key_data(key_data: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            key_data: SecretString::from(key_data.into()),
            source: source.into(),
        }
    }

    async fn from_file(path: &Path, label: &str) -> Result<Self> {
        let key_data = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {label}: {}", path.display()))?;
        Ok(Self::from_key_data(key_data, format!("{label}:{}", path.display())))
    }
}

/// Discover and load the age identity using the priority chain:
///   1. $CREDENTIALS_DIRECTORY/age-identity  (systemd credential injection)
///   2. $SOPS_AGE_KEY_FILE  (explicit path env var)
///   3. $SOPS_AGE_KEY  (literal key in env var, may be multi-line)
///   4. config.identity path (from treeseal.toml)
///   5. ~/.config/sops/age/keys.txt  (default XDG location)
pub async fn find_age_identity(config: &AgeConfig) -> Result<IdentityProvider> {
    if let Ok(cred_dir) = std::env::var("CREDENTIALS_DIRECTORY") {
        let path = PathBuf::from(&cred_dir).join("age-identity");
        if path.exists() {
            return IdentityProvider::from_file(&path, "systemd").await;
        }
    }

    if let Ok(key_file) = std::env::var("SOPS_AGE_KEY_FILE") {
        let path = PathBuf::from(&key_file);
        if path.exists() {
            return IdentityProvider::from_file(&path, "SOPS_AGE_KEY_FILE").await;
        }
    }

    if let Ok(key_content) = std::env::var("SOPS_AGE_KEY") {
        if !key_content.is_empty() {
            return Ok(IdentityProvider::from_key_data(key_content, "SOPS_AGE_KEY (env)"));
        }
    }

    if let Some(identity_path) = &config.identity {
        let expanded = expand_tilde(identity_path);
        if expanded.exists() {
            return IdentityProvider::from_file(&expanded, "config").await;
        }
    }

    let default_path = default_age_key_path();
    if default_path.exists() {
        return IdentityProvider::from_file(&default_path, "default").await;
    }

    anyhow::bail!(
        "no age identity found. Tried: $CREDENTIALS_DIRECTORY/age-identity, \
         $SOPS_AGE_KEY_FILE, $SOPS_AGE_KEY, config path, and {}",
        default_path.display()
    )
}

fn default_age_key_path() -> PathBuf {
    home_dir().join(".config/sops/age/keys.txt")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn expand_tilde(path: &Path) -> PathBuf {
    match path.to_str().and_then(|s| s.strip_prefix("~/")) {
        Some(rest) => home_dir().join(rest),
        None => path.to_path_buf(),
    }
}
