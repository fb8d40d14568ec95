//! Shared fixtures: fake backends and sample documents.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use treeseal::{
    BackendError, Backends, Engine, EngineConfig, KeyKind, KeySource, KmsClient, KmsMasterKey,
    LocalKms, MasterKey, PgpClient, PgpMasterKey, TreeBranch, Value,
};

pub const PROD_ARN: &str = "arn:aws:kms:us-east-1:111122223333:key/prod";
pub const DR_ARN: &str = "arn:aws:kms:eu-west-1:111122223333:key/dr";
pub const PGP_FP: &str = "85D77543B3D624B63CEA9E6DBC17301B491B3F21";

/// `{name, password, password_unencrypted, replicas}`
pub fn scenario_tree() -> TreeBranch {
    let mut tree = TreeBranch::new();
    tree.insert("name", "prod-db");
    tree.insert("password", "s3cr3t");
    tree.insert("password_unencrypted", "hint");
    tree.insert("replicas", 3i64);
    tree
}

/// Nested tree covering every value kind.
pub fn rich_tree() -> TreeBranch {
    let mut primary = TreeBranch::new();
    primary.insert("host", "db-1.internal");
    primary.insert("port", 5432i64);
    primary.insert("tls", true);

    let mut replica = TreeBranch::new();
    replica.insert("host", "db-2.internal");
    replica.insert("weight", 0.25);

    let mut tree = TreeBranch::new();
    tree.insert("service", "billing");
    tree.insert("databases", vec![Value::Branch(primary), Value::Branch(replica)]);
    tree.insert("api_key", "sk_live_0123456789");
    tree.insert("zip", "02134");
    tree.insert("retries", -3i64);
    tree.insert("threshold", 1.0e-3);
    tree.insert("debug", false);
    tree.insert("notes_unencrypted", "rotate quarterly");
    tree.insert("unset", Value::Null);
    tree.insert("empty", "");
    tree.insert("tags", vec![Value::from("a"), Value::from(2i64), Value::from(true)]);
    tree
}

pub fn local_kms() -> Arc<LocalKms> {
    let kms = LocalKms::new();
    assert!(kms.create_key(PROD_ARN));
    assert!(kms.create_key(DR_ARN));
    Arc::new(kms)
}

pub fn kms_source(arns: &[&str]) -> KeySource {
    KeySource::with_keys(
        KeyKind::Kms,
        arns.iter().map(|a| MasterKey::from(KmsMasterKey::new(*a))).collect(),
    )
}

pub fn pgp_source(fingerprints: &[&str]) -> KeySource {
    KeySource::with_keys(
        KeyKind::Pgp,
        fingerprints
            .iter()
            .map(|fp| MasterKey::from(PgpMasterKey::new(*fp)))
            .collect(),
    )
}

pub fn fast_config() -> EngineConfig {
    EngineConfig {
        timeout: Some(Duration::from_secs(5)),
        ..EngineConfig::default()
    }
}

pub fn engine_with(backends: Backends) -> Engine {
    Engine::with_config(backends, fast_config())
}

/// Flip one byte of the ciphertext inside an `ENC[...]` envelope.
pub fn flip_ciphertext_byte(envelope: &str) -> String {
    let start = envelope.find("data:").expect("data field") + "data:".len();
    let end = start + envelope[start..].find(',').expect("end of data field");
    let mut data = B64.decode(&envelope[start..end]).expect("base64 data");
    data[0] ^= 0x01;
    format!("{}{}{}", &envelope[..start], B64.encode(data), &envelope[end..])
}

/// KMS that is always unreachable.
pub struct FailingKms;

#[async_trait]
impl KmsClient for FailingKms {
    async fn encrypt(&self, arn: &str, _: Option<&str>, _: &[u8]) -> Result<Vec<u8>, BackendError> {
        Err(BackendError::Unavailable(format!("connect {arn}: connection refused")))
    }

    async fn decrypt(&self, arn: &str, _: Option<&str>, _: &[u8]) -> Result<Vec<u8>, BackendError> {
        Err(BackendError::Unavailable(format!("connect {arn}: connection refused")))
    }
}

/// KMS that answers after `delay`, delegating to an inner client.
pub struct SlowKms {
    pub inner: Arc<LocalKms>,
    pub delay: Duration,
}

#[async_trait]
impl KmsClient for SlowKms {
    async fn encrypt(
        &self,
        arn: &str,
        role: Option<&str>,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, BackendError> {
        tokio::time::sleep(self.delay).await;
        self.inner.encrypt(arn, role, plaintext).await
    }

    async fn decrypt(
        &self,
        arn: &str,
        role: Option<&str>,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, BackendError> {
        tokio::time::sleep(self.delay).await;
        self.inner.decrypt(arn, role, ciphertext).await
    }
}

/// KMS that wraps normally but unwraps to a fixed, unrelated payload.
pub struct ForgetfulKms {
    pub inner: Arc<LocalKms>,
    pub unwrap_to: Vec<u8>,
}

#[async_trait]
impl KmsClient for ForgetfulKms {
    async fn encrypt(
        &self,
        arn: &str,
        role: Option<&str>,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, BackendError> {
        self.inner.encrypt(arn, role, plaintext).await
    }

    async fn decrypt(&self, _: &str, _: Option<&str>, _: &[u8]) -> Result<Vec<u8>, BackendError> {
        Ok(self.unwrap_to.clone())
    }
}

/// Records the ARN of every decrypt call before delegating.
pub struct RecordingKms {
    pub inner: Arc<LocalKms>,
    pub calls: Mutex<Vec<String>>,
}

impl RecordingKms {
    pub fn new(inner: Arc<LocalKms>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl KmsClient for RecordingKms {
    async fn encrypt(
        &self,
        arn: &str,
        role: Option<&str>,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, BackendError> {
        self.inner.encrypt(arn, role, plaintext).await
    }

    async fn decrypt(
        &self,
        arn: &str,
        role: Option<&str>,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, BackendError> {
        self.calls.lock().expect("calls lock").push(arn.to_owned());
        self.inner.decrypt(arn, role, ciphertext).await
    }
}

/// Stand-in for a PGP agent: "encrypts" to known fingerprints only.
pub struct FakePgp {
    pub known: Vec<String>,
}

impl FakePgp {
    pub fn knowing(fingerprints: &[&str]) -> Self {
        Self {
            known: fingerprints.iter().map(|f| f.to_string()).collect(),
        }
    }
}

#[async_trait]
impl PgpClient for FakePgp {
    async fn encrypt(&self, fingerprint: &str, plaintext: &[u8]) -> Result<String, BackendError> {
        if !self.known.iter().any(|k| k == fingerprint) {
            return Err(BackendError::InvalidState(format!("{fingerprint}: No public key")));
        }
        Ok(format!(
            "-----BEGIN PGP MESSAGE-----\n{fingerprint}:{}\n-----END PGP MESSAGE-----\n",
            B64.encode(plaintext)
        ))
    }

    async fn decrypt(&self, fingerprint: &str, armored: &str) -> Result<Vec<u8>, BackendError> {
        let body = armored
            .lines()
            .nth(1)
            .and_then(|l| l.strip_prefix(&format!("{fingerprint}:")))
            .ok_or_else(|| BackendError::InvalidState("decryption failed: No secret key".into()))?;
        B64.decode(body)
            .map_err(|e| BackendError::InvalidState(format!("bad armor: {e}")))
    }
}
