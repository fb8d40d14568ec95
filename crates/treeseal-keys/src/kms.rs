//! KMS master keys and the in-process `LocalKms` backend

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use treeseal_core::{timestamp, BackendError, TreeBranch, TreesealResult};
use treeseal_crypto::{DataKey, KEY_SIZE};
use zeroize::Zeroizing;

use crate::master_key::EntryReader;

const WRAP_NONCE_SIZE: usize = 24;

/// A KMS key by ARN, optionally reached through an assumed role. The
/// wrapped data key is stored base64-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct KmsMasterKey {
    pub arn: String,
    pub role: Option<String>,
    pub encrypted_key: String,
    pub creation_date: DateTime<Utc>,
}

impl KmsMasterKey {
    pub fn new(arn: impl Into<String>) -> Self {
        Self {
            arn: arn.into(),
            role: None,
            encrypted_key: String::new(),
            creation_date: timestamp::now(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub(crate) async fn wrap(
        &self,
        client: &dyn KmsClient,
        data_key: &DataKey,
    ) -> Result<String, BackendError> {
        let blob = client
            .encrypt(&self.arn, self.role.as_deref(), data_key.as_bytes())
            .await?;
        Ok(B64.encode(blob))
    }

    pub(crate) async fn unwrap(
        &self,
        client: &dyn KmsClient,
    ) -> Result<Zeroizing<Vec<u8>>, BackendError> {
        let blob = B64
            .decode(&self.encrypted_key)
            .map_err(|e| BackendError::InvalidState(format!("stored KMS blob is not base64: {e}")))?;
        client
            .decrypt(&self.arn, self.role.as_deref(), &blob)
            .await
            .map(Zeroizing::new)
    }

    pub(crate) fn to_map(&self) -> TreeBranch {
        let mut map = TreeBranch::new();
        map.insert("arn", self.arn.as_str());
        if let Some(role) = &self.role {
            map.insert("role", role.as_str());
        }
        map.insert("enc", self.encrypted_key.as_str());
        map.insert("created_at", timestamp::format(&self.creation_date));
        map
    }

    pub(crate) fn from_entry(entry: &EntryReader<'_>) -> TreesealResult<Self> {
        Ok(Self {
            arn: entry.required("arn")?,
            role: entry.optional("role")?,
            encrypted_key: entry.required("enc")?,
            creation_date: entry.created_at()?,
        })
    }
}

/// A key management service able to encrypt small payloads under a named key.
///
/// Implementations classify their own transport errors into [`BackendError`].
#[async_trait]
pub trait KmsClient: Send + Sync {
    async fn encrypt(
        &self,
        arn: &str,
        role: Option<&str>,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, BackendError>;

    async fn decrypt(
        &self,
        arn: &str,
        role: Option<&str>,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, BackendError>;
}

/// In-process KMS: named 256-bit keys held in memory, XChaCha20-Poly1305
/// wrapping with the ARN as additional data.
///
/// Output: `[24-byte nonce][ciphertext + 16-byte tag]`
pub struct LocalKms {
    keys: RwLock<HashMap<String, LocalKey>>,
}

struct LocalKey {
    material: Zeroizing<[u8; KEY_SIZE]>,
    enabled: bool,
    allowed_roles: Option<Vec<String>>,
}

impl LocalKms {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Create a key with random material, replacing any key with that ARN.
    /// Returns false if the key store is poisoned and nothing was stored.
    pub fn create_key(&self, arn: impl Into<String>) -> bool {
        let mut material = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut material);
        self.import_key(arn, material)
    }

    /// Returns false if the key store is poisoned and nothing was stored.
    pub fn import_key(&self, arn: impl Into<String>, material: [u8; KEY_SIZE]) -> bool {
        let Ok(mut keys) = self.keys.write() else {
            return false;
        };
        let key = LocalKey {
            material: Zeroizing::new(material),
            enabled: true,
            allowed_roles: None,
        };
        keys.insert(arn.into(), key);
        true
    }

    /// Returns false if no key has this ARN.
    pub fn set_enabled(&self, arn: &str, enabled: bool) -> bool {
        self.update(arn, |key| key.enabled = enabled)
    }

    /// Only callers presenting one of `roles` may use the key afterwards.
    pub fn restrict_roles(&self, arn: &str, roles: Vec<String>) -> bool {
        self.update(arn, |key| key.allowed_roles = Some(roles))
    }

    fn update(&self, arn: &str, f: impl FnOnce(&mut LocalKey)) -> bool {
        let Ok(mut keys) = self.keys.write() else {
            return false;
        };
        match keys.get_mut(arn) {
            Some(key) => {
                f(key);
                true
            }
            None => false,
        }
    }

    fn with_key<T>(
        &self,
        arn: &str,
        role: Option<&str>,
        f: impl FnOnce(&XChaCha20Poly1305) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let keys = self
            .keys
            .read()
            .map_err(|_| BackendError::Unavailable("local KMS key table is poisoned".into()))?;
        let key = keys
            .get(arn)
            .ok_or_else(|| BackendError::InvalidState(format!("KMS key {arn} not found")))?;

        if !key.enabled {
            return Err(BackendError::InvalidState(format!("KMS key {arn} is disabled")));
        }
        if let Some(allowed) = &key.allowed_roles {
            if !role.is_some_and(|r| allowed.iter().any(|a| a == r)) {
                return Err(BackendError::Denied(format!(
                    "role {} may not use KMS key {arn}",
                    role.unwrap_or("<none>")
                )));
            }
        }

        let material: &[u8; KEY_SIZE] = &key.material;
        let cipher = XChaCha20Poly1305::new(material.into());
        f(&cipher)
    }
}

impl Default for LocalKms {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KmsClient for LocalKms {
    async fn encrypt(
        &self,
        arn: &str,
        role: Option<&str>,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, BackendError> {
        self.with_key(arn, role, |cipher| {
            let mut nonce_bytes = [0u8; WRAP_NONCE_SIZE];
            rand::thread_rng().fill_bytes(&mut nonce_bytes);

            let ciphertext = cipher
                .encrypt(
                    XNonce::from_slice(&nonce_bytes),
                    Payload {
                        msg: plaintext,
                        aad: arn.as_bytes(),
                    },
                )
                .map_err(|e| BackendError::Unavailable(format!("key wrapping failed: {e}")))?;

            let mut result = Vec::with_capacity(WRAP_NONCE_SIZE + ciphertext.len());
            result.extend_from_slice(&nonce_bytes);
            result.extend_from_slice(&ciphertext);
            Ok(result)
        })
    }

    async fn decrypt(
        &self,
        arn: &str,
        role: Option<&str>,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, BackendError> {
        self.with_key(arn, role, |cipher| {
            if ciphertext.len() < WRAP_NONCE_SIZE {
                return Err(BackendError::InvalidState(format!(
                    "wrapped key too short: {} bytes",
                    ciphertext.len()
                )));
            }
            let (nonce, sealed) = ciphertext.split_at(WRAP_NONCE_SIZE);
            cipher
                .decrypt(
                    XNonce::from_slice(nonce),
                    Payload {
                        msg: sealed,
                        aad: arn.as_bytes(),
                    },
                )
                .map_err(|_| {
                    BackendError::InvalidState(format!(
                        "ciphertext was not produced by KMS key {arn}"
                    ))
                })
        })
    }
}
