//! Tree encryption engine
//!
//! Encrypt:
//! 1. generate a 256-bit data key
//! 2. wrap it under every master key (concurrently, failures recorded)
//! 3. encrypt each leaf with AES-256-GCM, AAD = rendered leaf path
//! 4. MAC every plaintext leaf, encrypt the MAC with AAD = `lastmodified`
//!
//! Decrypt mirrors this, recovering the data key from the first master key
//! that can unwrap it and verifying the MAC before returning anything.
//!
//! Inputs are never mutated; every operation builds new values, so a
//! cancelled or failed call leaves nothing half-transformed.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use treeseal_core::config::{KeysConfig, TreesealConfig};
use treeseal_core::{timestamp, TreeBranch, TreesealError, TreesealResult};
use treeseal_crypto::{generate_data_key, macs_match, DataKey};
use treeseal_keys::{
    AgeMasterKey, Backends, KeyKind, KeySource, KmsMasterKey, MasterKey, PgpMasterKey,
};

use crate::keyring::{self, KeyFailure};
use crate::metadata::{Metadata, DEFAULT_UNENCRYPTED_SUFFIX, FORMAT_VERSION, METADATA_KEY};
use crate::transform;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Suffix marking keys whose leaves stay plaintext in new documents.
    pub unencrypted_suffix: String,
    /// Per backend call. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Backend calls in flight per operation.
    pub max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unencrypted_suffix: DEFAULT_UNENCRYPTED_SUFFIX.into(),
            timeout: Some(Duration::from_secs(30)),
            max_concurrency: 4,
        }
    }
}

impl From<&TreesealConfig> for EngineConfig {
    fn from(config: &TreesealConfig) -> Self {
        let backends = &config.backends;
        Self {
            unencrypted_suffix: config.encryption.unencrypted_suffix.clone(),
            timeout: (backends.timeout_secs > 0)
                .then(|| Duration::from_secs(backends.timeout_secs)),
            max_concurrency: backends.max_concurrency.max(1),
        }
    }
}

/// Master keys a new document should be protected with, one source per
/// configured kind, in `kms`, `pgp`, `age` order.
pub fn key_sources_from_config(keys: &KeysConfig) -> Vec<KeySource> {
    let kms: Vec<MasterKey> = keys
        .kms
        .iter()
        .map(|k| {
            let key = KmsMasterKey::new(k.arn.as_str());
            let key = match &k.role {
                Some(role) => key.with_role(role.as_str()),
                None => key,
            };
            key.into()
        })
        .collect();
    let pgp: Vec<MasterKey> = keys
        .pgp
        .iter()
        .map(|fp| PgpMasterKey::new(fp.as_str()).into())
        .collect();
    let age: Vec<MasterKey> = keys
        .age
        .iter()
        .map(|r| AgeMasterKey::new(r.as_str()).into())
        .collect();

    [(KeyKind::Kms, kms), (KeyKind::Pgp, pgp), (KeyKind::Age, age)]
        .into_iter()
        .map(|(kind, keys)| KeySource::with_keys(kind, keys))
        .filter(|source| !source.is_empty())
        .collect()
}

/// Output of [`Engine::encrypt`] and [`Engine::rotate`].
#[derive(Debug, Clone)]
pub struct Encrypted {
    pub tree: TreeBranch,
    pub metadata: Metadata,
    /// Master keys that could not wrap the data key and were omitted.
    pub failures: Vec<KeyFailure>,
}

/// Output of [`Engine::update_keys`].
#[derive(Debug, Clone)]
pub struct Rewrapped {
    pub metadata: Metadata,
    pub failures: Vec<KeyFailure>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DecryptOptions {
    /// Return the decrypted tree even when the MAC is missing, unreadable or
    /// does not match. The output is then NOT integrity-checked.
    pub ignore_mac: bool,
}

impl DecryptOptions {
    pub fn insecure_ignore_mac() -> Self {
        Self { ignore_mac: true }
    }
}

pub struct Engine {
    backends: Backends,
    config: EngineConfig,
}

impl Engine {
    pub fn new(backends: Backends) -> Self {
        Self::with_config(backends, EngineConfig::default())
    }

    pub fn with_config(backends: Backends, config: EngineConfig) -> Self {
        Self { backends, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Encrypt `tree` under a fresh data key wrapped by `key_sources`.
    pub async fn encrypt(
        &self,
        tree: &TreeBranch,
        key_sources: &[KeySource],
        cancel: &CancellationToken,
    ) -> TreesealResult<Encrypted> {
        cancellable(
            cancel,
            self.encrypt_inner(tree, key_sources, &self.config.unencrypted_suffix),
        )
        .await
    }

    /// Decrypt `tree`, verifying every leaf's path binding and the MAC.
    pub async fn decrypt(
        &self,
        tree: &TreeBranch,
        metadata: &Metadata,
        options: DecryptOptions,
        cancel: &CancellationToken,
    ) -> TreesealResult<TreeBranch> {
        cancellable(cancel, async {
            let data_key = self.recover(metadata).await?;
            self.open(&data_key, tree, metadata, options)
        })
        .await
    }

    /// Unwrap the data key without touching the document.
    pub async fn recover_data_key(
        &self,
        metadata: &Metadata,
        cancel: &CancellationToken,
    ) -> TreesealResult<DataKey> {
        cancellable(cancel, self.recover(metadata)).await
    }

    /// Re-encrypt the whole document under a new data key, wrapped by the
    /// same master keys. The document's own suffix is kept.
    pub async fn rotate(
        &self,
        tree: &TreeBranch,
        metadata: &Metadata,
        cancel: &CancellationToken,
    ) -> TreesealResult<Encrypted> {
        cancellable(cancel, async {
            let data_key = self.recover(metadata).await?;
            let plaintext = self.open(&data_key, tree, metadata, DecryptOptions::default())?;
            drop(data_key);

            let targets: Vec<KeySource> = metadata
                .key_sources
                .iter()
                .map(|source| {
                    let keys = source
                        .keys
                        .iter()
                        .cloned()
                        .map(|mut key| {
                            key.clear_wrapped();
                            key
                        })
                        .collect();
                    KeySource::with_keys(source.kind, keys)
                })
                .collect();

            let rotated = self
                .encrypt_inner(&plaintext, &targets, &metadata.unencrypted_suffix)
                .await?;
            tracing::info!(keys = rotated.metadata.key_count(), "data key rotated");
            Ok(rotated)
        })
        .await
    }

    /// Wrap the existing data key under `key_sources`, replacing the
    /// document's master keys. Leaves are untouched; the MAC is re-bound to
    /// the new `lastmodified`.
    pub async fn update_keys(
        &self,
        tree: &TreeBranch,
        metadata: &Metadata,
        key_sources: &[KeySource],
        cancel: &CancellationToken,
    ) -> TreesealResult<Rewrapped> {
        cancellable(cancel, async {
            let data_key = self.recover(metadata).await?;
            let digest = transform::open_mac(
                &data_key,
                &metadata.mac,
                &metadata.last_modified,
                tree,
                &metadata.unencrypted_suffix,
            )?;
            let (_, recomputed) =
                transform::decrypt_leaves(&data_key, tree, &metadata.unencrypted_suffix)?;
            if !macs_match(&recomputed, &digest) {
                return Err(mac_mismatch());
            }

            let (key_sources, failures) =
                keyring::wrap_all(&self.backends, key_sources, &data_key, &self.config).await?;
            let last_modified = timestamp::now();
            let mac = transform::seal_mac(&data_key, &digest, &last_modified)?;

            let metadata = Metadata {
                version: metadata.version.clone(),
                unencrypted_suffix: metadata.unencrypted_suffix.clone(),
                last_modified,
                mac,
                key_sources,
            };
            tracing::info!(
                keys = metadata.key_count(),
                failed = failures.len(),
                "master keys updated"
            );
            Ok(Rewrapped { metadata, failures })
        })
        .await
    }

    async fn encrypt_inner(
        &self,
        tree: &TreeBranch,
        key_sources: &[KeySource],
        suffix: &str,
    ) -> TreesealResult<Encrypted> {
        if tree.contains_key(METADATA_KEY) {
            return Err(TreesealError::AlreadyEncrypted);
        }

        let data_key = generate_data_key();
        let (key_sources, failures) =
            keyring::wrap_all(&self.backends, key_sources, &data_key, &self.config).await?;

        let (encrypted, digest) = transform::encrypt_leaves(&data_key, tree, suffix)?;
        let last_modified = timestamp::now();
        let mac = transform::seal_mac(&data_key, &digest, &last_modified)?;

        let metadata = Metadata {
            version: FORMAT_VERSION.into(),
            unencrypted_suffix: suffix.to_owned(),
            last_modified,
            mac,
            key_sources,
        };
        tracing::info!(
            keys = metadata.key_count(),
            failed = failures.len(),
            "document encrypted"
        );
        Ok(Encrypted {
            tree: encrypted,
            metadata,
            failures,
        })
    }

    async fn recover(&self, metadata: &Metadata) -> TreesealResult<DataKey> {
        let (bytes, key) =
            keyring::unwrap_first(&self.backends, &metadata.key_sources, &self.config).await?;
        DataKey::from_slice(&bytes)
            .map_err(|e| TreesealError::InvalidDataKey(format!("{key} returned {e}")))
    }

    fn open(
        &self,
        data_key: &DataKey,
        tree: &TreeBranch,
        metadata: &Metadata,
        options: DecryptOptions,
    ) -> TreesealResult<TreeBranch> {
        let suffix = &metadata.unencrypted_suffix;
        let stored = match transform::open_mac(
            data_key,
            &metadata.mac,
            &metadata.last_modified,
            tree,
            suffix,
        ) {
            Ok(digest) => Some(digest),
            Err(e @ TreesealError::IntegrityCheckFailed(_)) if options.ignore_mac => {
                tracing::warn!(error = %e, "stored MAC unusable, continuing with ignore_mac set");
                None
            }
            Err(e) => return Err(e),
        };

        let (plaintext, computed) = transform::decrypt_leaves(data_key, tree, suffix)?;

        match stored {
            Some(digest) if macs_match(&computed, &digest) => {}
            _ if options.ignore_mac => {
                tracing::warn!("MAC not verified, returning document without integrity guarantee");
            }
            _ => return Err(mac_mismatch()),
        }

        tracing::info!("document decrypted");
        Ok(plaintext)
    }
}

fn mac_mismatch() -> TreesealError {
    TreesealError::IntegrityCheckFailed(
        "MAC mismatch: document values, types or order changed since encryption".into(),
    )
}

/// Race `op` against `cancel`. Cancellation wins ties and drops `op`,
/// cancelling any backend calls still in flight.
async fn cancellable<T>(
    cancel: &CancellationToken,
    op: impl Future<Output = TreesealResult<T>>,
) -> TreesealResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TreesealError::Cancelled),
        result = op => result,
    }
}
