//! The closed set of master-key kinds and their persisted form

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use treeseal_core::{
    timestamp, BackendError, Scalar, TreeBranch, TreesealError, TreesealResult, Value,
};
use treeseal_crypto::DataKey;
use zeroize::Zeroizing;

use crate::age::AgeMasterKey;
use crate::backends::Backends;
use crate::kms::KmsMasterKey;
use crate::pgp::PgpMasterKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Kms,
    Pgp,
    Age,
}

impl KeyKind {
    /// Metadata order: sources are written kms, pgp, age.
    pub const ALL: [KeyKind; 3] = [KeyKind::Kms, KeyKind::Pgp, KeyKind::Age];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Kms => "kms",
            KeyKind::Pgp => "pgp",
            KeyKind::Age => "age",
        }
    }
}

impl FromStr for KeyKind {
    type Err = TreesealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kms" => Ok(KeyKind::Kms),
            "pgp" => Ok(KeyKind::Pgp),
            "age" => Ok(KeyKind::Age),
            other => Err(TreesealError::MalformedMetadata(format!(
                "unknown key kind {other:?}"
            ))),
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One master key plus, once wrapped, its copy of the data key.
#[derive(Debug, Clone, PartialEq)]
pub enum MasterKey {
    Kms(KmsMasterKey),
    Pgp(PgpMasterKey),
    Age(AgeMasterKey),
}

impl MasterKey {
    pub fn kind(&self) -> KeyKind {
        match self {
            MasterKey::Kms(_) => KeyKind::Kms,
            MasterKey::Pgp(_) => KeyKind::Pgp,
            MasterKey::Age(_) => KeyKind::Age,
        }
    }

    /// ARN, fingerprint or recipient.
    pub fn identifier(&self) -> &str {
        match self {
            MasterKey::Kms(k) => &k.arn,
            MasterKey::Pgp(k) => &k.fingerprint,
            MasterKey::Age(k) => &k.recipient,
        }
    }

    pub fn encrypted_key(&self) -> &str {
        match self {
            MasterKey::Kms(k) => &k.encrypted_key,
            MasterKey::Pgp(k) => &k.encrypted_key,
            MasterKey::Age(k) => &k.encrypted_key,
        }
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        match self {
            MasterKey::Kms(k) => k.creation_date,
            MasterKey::Pgp(k) => k.creation_date,
            MasterKey::Age(k) => k.creation_date,
        }
    }

    pub fn is_wrapped(&self) -> bool {
        !self.encrypted_key().is_empty()
    }

    /// Record a successful wrap.
    pub fn set_wrapped(&mut self, encrypted_key: String, at: DateTime<Utc>) {
        let (slot, created) = match self {
            MasterKey::Kms(k) => (&mut k.encrypted_key, &mut k.creation_date),
            MasterKey::Pgp(k) => (&mut k.encrypted_key, &mut k.creation_date),
            MasterKey::Age(k) => (&mut k.encrypted_key, &mut k.creation_date),
        };
        *slot = encrypted_key;
        *created = at;
    }

    /// Forget the wrapped blob, keeping the key reference.
    pub fn clear_wrapped(&mut self) {
        match self {
            MasterKey::Kms(k) => k.encrypted_key.clear(),
            MasterKey::Pgp(k) => k.encrypted_key.clear(),
            MasterKey::Age(k) => k.encrypted_key.clear(),
        }
    }

    /// Encrypt `data_key` under this master key, returning the blob to persist.
    pub async fn wrap_data_key(
        &self,
        backends: &Backends,
        data_key: &DataKey,
    ) -> Result<String, BackendError> {
        match self {
            MasterKey::Kms(k) => k.wrap(backends.kms()?, data_key).await,
            MasterKey::Pgp(k) => k.wrap(backends.pgp()?, data_key).await,
            MasterKey::Age(k) => k.wrap(data_key),
        }
    }

    /// Decrypt the stored blob. Length is not checked here; the caller
    /// validates the recovered key against the document.
    pub async fn unwrap_data_key(
        &self,
        backends: &Backends,
    ) -> Result<Zeroizing<Vec<u8>>, BackendError> {
        if !self.is_wrapped() {
            return Err(BackendError::InvalidState(format!(
                "{self} holds no encrypted data key"
            )));
        }
        match self {
            MasterKey::Kms(k) => k.unwrap(backends.kms()?).await,
            MasterKey::Pgp(k) => k.unwrap(backends.pgp()?).await,
            MasterKey::Age(k) => {
                let identity = backends.age()?;
                let blob = k.encrypted_key.clone();
                // age decryption is CPU-bound; keep it off the reactor
                tokio::task::spawn_blocking(move || {
                    crate::age::decrypt_with_identity(&identity, blob.as_bytes())
                })
                .await
                .map_err(|e| BackendError::Unavailable(format!("age worker failed: {e}")))?
            }
        }
    }

    /// Persisted entry, fields in a fixed order per kind.
    pub fn to_map(&self) -> TreeBranch {
        match self {
            MasterKey::Kms(k) => k.to_map(),
            MasterKey::Pgp(k) => k.to_map(),
            MasterKey::Age(k) => k.to_map(),
        }
    }

    pub fn from_map(kind: KeyKind, map: &TreeBranch) -> TreesealResult<Self> {
        let entry = EntryReader { kind, map };
        Ok(match kind {
            KeyKind::Kms => MasterKey::Kms(KmsMasterKey::from_entry(&entry)?),
            KeyKind::Pgp => MasterKey::Pgp(PgpMasterKey::from_entry(&entry)?),
            KeyKind::Age => MasterKey::Age(AgeMasterKey::from_entry(&entry)?),
        })
    }
}

impl fmt::Display for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.identifier())
    }
}

impl From<KmsMasterKey> for MasterKey {
    fn from(k: KmsMasterKey) -> Self {
        MasterKey::Kms(k)
    }
}

impl From<PgpMasterKey> for MasterKey {
    fn from(k: PgpMasterKey) -> Self {
        MasterKey::Pgp(k)
    }
}

impl From<AgeMasterKey> for MasterKey {
    fn from(k: AgeMasterKey) -> Self {
        MasterKey::Age(k)
    }
}

/// A group of master keys of one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySource {
    pub kind: KeyKind,
    pub keys: Vec<MasterKey>,
}

impl KeySource {
    pub fn new(kind: KeyKind) -> Self {
        Self {
            kind,
            keys: Vec::new(),
        }
    }

    pub fn with_keys(kind: KeyKind, keys: Vec<MasterKey>) -> Self {
        Self { kind, keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Field access over one persisted key entry.
pub(crate) struct EntryReader<'a> {
    kind: KeyKind,
    map: &'a TreeBranch,
}

impl EntryReader<'_> {
    fn malformed(&self, reason: String) -> TreesealError {
        TreesealError::MalformedKeyEntry {
            kind: self.kind.to_string(),
            reason,
        }
    }

    pub(crate) fn required(&self, field: &str) -> TreesealResult<String> {
        self.optional(field)?
            .ok_or_else(|| self.malformed(format!("missing field {field:?}")))
    }

    pub(crate) fn optional(&self, field: &str) -> TreesealResult<Option<String>> {
        match self.map.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Scalar(Scalar::Str(s))) => Ok(Some(s.clone())),
            Some(_) => Err(self.malformed(format!("field {field:?} is not a string"))),
        }
    }

    pub(crate) fn created_at(&self) -> TreesealResult<DateTime<Utc>> {
        timestamp::parse(&self.required("created_at")?)
    }
}
