//! PGP master keys, backed by the `gpg` CLI

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use treeseal_core::config::BackendsConfig;
use treeseal_core::{timestamp, BackendError, TreeBranch, TreesealResult};
use treeseal_crypto::DataKey;
use zeroize::Zeroizing;

use crate::master_key::EntryReader;

/// A PGP key by fingerprint. The wrapped data key is an armored PGP message.
#[derive(Debug, Clone, PartialEq)]
pub struct PgpMasterKey {
    pub fingerprint: String,
    pub encrypted_key: String,
    pub creation_date: DateTime<Utc>,
}

impl PgpMasterKey {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            encrypted_key: String::new(),
            creation_date: timestamp::now(),
        }
    }

    pub(crate) async fn wrap(
        &self,
        client: &dyn PgpClient,
        data_key: &DataKey,
    ) -> Result<String, BackendError> {
        client.encrypt(&self.fingerprint, data_key.as_bytes()).await
    }

    pub(crate) async fn unwrap(
        &self,
        client: &dyn PgpClient,
    ) -> Result<Zeroizing<Vec<u8>>, BackendError> {
        client
            .decrypt(&self.fingerprint, &self.encrypted_key)
            .await
            .map(Zeroizing::new)
    }

    pub(crate) fn to_map(&self) -> TreeBranch {
        let mut map = TreeBranch::new();
        map.insert("fp", self.fingerprint.as_str());
        map.insert("enc", self.encrypted_key.as_str());
        map.insert("created_at", timestamp::format(&self.creation_date));
        map
    }

    pub(crate) fn from_entry(entry: &EntryReader<'_>) -> TreesealResult<Self> {
        Ok(Self {
            fingerprint: entry.required("fp")?,
            encrypted_key: entry.required("enc")?,
            creation_date: entry.created_at()?,
        })
    }
}

#[async_trait]
pub trait PgpClient: Send + Sync {
    /// Encrypt to `fingerprint`, returning an ASCII-armored message.
    async fn encrypt(&self, fingerprint: &str, plaintext: &[u8]) -> Result<String, BackendError>;

    async fn decrypt(&self, fingerprint: &str, armored: &str) -> Result<Vec<u8>, BackendError>;
}

/// Runs `gpg` in batch mode. Decryption relies on the agent holding the
/// secret key; no passphrase is ever passed on the command line.
#[derive(Debug, Clone)]
pub struct GpgCli {
    binary: PathBuf,
    homedir: Option<PathBuf>,
}

impl GpgCli {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("gpg"),
            homedir: None,
        }
    }

    pub fn from_config(config: &BackendsConfig) -> Self {
        Self {
            binary: PathBuf::from(&config.gpg_binary),
            homedir: config.gpg_homedir.clone(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_homedir(mut self, homedir: impl Into<PathBuf>) -> Self {
        self.homedir = Some(homedir.into());
        self
    }

    async fn run(&self, args: &[&str], input: &[u8]) -> Result<Vec<u8>, BackendError> {
        let mut cmd = Command::new(&self.binary);
        if let Some(home) = &self.homedir {
            cmd.arg("--homedir").arg(home);
        }
        let mut child = cmd
            .args(["--batch", "--no-tty", "--quiet"])
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.binary.display()))
            .map_err(unavailable)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input)
                .await
                .context("writing to gpg stdin")
                .map_err(unavailable)?;
            // dropping stdin signals EOF
        }

        let output = child
            .wait_with_output()
            .await
            .context("waiting for gpg")
            .map_err(unavailable)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!(status = %output.status, stderr = %stderr.trim(), "gpg failed");
            return Err(classify_gpg_failure(&stderr));
        }
        Ok(output.stdout)
    }
}

impl Default for GpgCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PgpClient for GpgCli {
    async fn encrypt(&self, fingerprint: &str, plaintext: &[u8]) -> Result<String, BackendError> {
        let stdout = self
            .run(
                &[
                    "--no-default-recipient",
                    "--trust-model",
                    "always",
                    "--armor",
                    "--output",
                    "-",
                    "--recipient",
                    fingerprint,
                    "--encrypt",
                ],
                plaintext,
            )
            .await?;
        String::from_utf8(stdout)
            .map_err(|_| BackendError::Unavailable("gpg produced non-UTF-8 armor".into()))
    }

    async fn decrypt(&self, _fingerprint: &str, armored: &str) -> Result<Vec<u8>, BackendError> {
        self.run(&["--output", "-", "--decrypt"], armored.as_bytes())
            .await
    }
}

fn unavailable(e: anyhow::Error) -> BackendError {
    BackendError::Unavailable(format!("{e:#}"))
}

/// Map gpg's stderr onto the backend error taxonomy.
pub fn classify_gpg_failure(stderr: &str) -> BackendError {
    let lower = stderr.to_lowercase();
    let detail = stderr
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .unwrap_or("gpg exited unsuccessfully")
        .to_string();

    const INVALID_STATE: &[&str] = &[
        "no secret key",
        "no public key",
        "unusable public key",
        "key expired",
        "key revoked",
        "no valid openpgp data",
        "invalid armor",
    ];
    const DENIED: &[&str] = &["bad passphrase", "operation cancelled", "permission denied"];

    if INVALID_STATE.iter().any(|m| lower.contains(m)) {
        BackendError::InvalidState(detail)
    } else if DENIED.iter().any(|m| lower.contains(m)) {
        BackendError::Denied(detail)
    } else {
        BackendError::Unavailable(detail)
    }
}
