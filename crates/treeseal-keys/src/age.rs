//! age master keys (age 0.11 API)

use std::io::{Read, Write};

use anyhow::Context;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use treeseal_core::{timestamp, BackendError, TreeBranch, TreesealResult};
use treeseal_crypto::DataKey;
use zeroize::Zeroizing;

use crate::identity::IdentityProvider;
use crate::master_key::EntryReader;

/// An X25519 recipient (`age1...`) and the armored age file holding the data key.
#[derive(Debug, Clone, PartialEq)]
pub struct AgeMasterKey {
    pub recipient: String,
    pub encrypted_key: String,
    pub creation_date: DateTime<Utc>,
}

impl AgeMasterKey {
    pub fn new(recipient: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            encrypted_key: String::new(),
            creation_date: timestamp::now(),
        }
    }

    pub(crate) fn wrap(&self, data_key: &DataKey) -> Result<String, BackendError> {
        encrypt_to_recipient(&self.recipient, data_key.as_bytes())
    }

    pub(crate) fn to_map(&self) -> TreeBranch {
        let mut map = TreeBranch::new();
        map.insert("recipient", self.recipient.as_str());
        map.insert("enc", self.encrypted_key.as_str());
        map.insert("created_at", timestamp::format(&self.creation_date));
        map
    }

    pub(crate) fn from_entry(entry: &EntryReader<'_>) -> TreesealResult<Self> {
        Ok(Self {
            recipient: entry.required("recipient")?,
            encrypted_key: entry.required("enc")?,
            creation_date: entry.created_at()?,
        })
    }
}

/// Encrypt `plaintext` to a single recipient, ASCII-armored.
pub fn encrypt_to_recipient(recipient: &str, plaintext: &[u8]) -> Result<String, BackendError> {
    let parsed: age::x25519::Recipient = recipient.parse().map_err(|e: &str| {
        BackendError::InvalidState(format!("invalid age recipient {recipient:?}: {e}"))
    })?;
    armored_encrypt(&parsed, plaintext).map_err(|e| BackendError::Unavailable(format!("{e:#}")))
}

fn armored_encrypt(recipient: &age::x25519::Recipient, plaintext: &[u8]) -> anyhow::Result<String> {
    use age::armor::{ArmoredWriter, Format};

    let encryptor =
        age::Encryptor::with_recipients(std::iter::once(recipient as &dyn age::Recipient))
            .context("creating age encryptor")?;

    let mut out = Vec::new();
    let armor =
        ArmoredWriter::wrap_output(&mut out, Format::AsciiArmor).context("creating armor writer")?;
    let mut writer = encryptor.wrap_output(armor).context("starting age stream")?;
    writer.write_all(plaintext).context("writing age payload")?;
    writer
        .finish()
        .and_then(|armor| armor.finish())
        .context("finishing age stream")?;

    String::from_utf8(out).context("armored age output is not UTF-8")
}

/// Decrypt armored age data using an identity.
///
/// A file none of the identities can open is `Denied`; a blob that is not
/// an age file at all is `InvalidState`.
pub fn decrypt_with_identity(
    identity: &IdentityProvider,
    encrypted_data: &[u8],
) -> Result<Zeroizing<Vec<u8>>, BackendError> {
    use age::armor::ArmoredReader;

    let identities = age::IdentityFile::from_buffer(std::io::BufReader::new(
        identity.key_data.expose_secret().as_bytes(),
    ))
    .map_err(|e| unusable_identity(identity, e))?
    .into_identities()
    .map_err(|e| unusable_identity(identity, e))?;

    let decryptor = age::Decryptor::new(ArmoredReader::new(encrypted_data))
        .map_err(|e| BackendError::InvalidState(format!("stored blob is not an age file: {e}")))?;

    if decryptor.is_scrypt() {
        return Err(BackendError::InvalidState(
            "passphrase-protected age files are not supported".into(),
        ));
    }

    let mut reader = decryptor
        .decrypt(identities.iter().map(|i| i.as_ref() as &dyn age::Identity))
        .map_err(|e| match e {
            age::DecryptError::NoMatchingKeys => BackendError::Denied(format!(
                "no identity from {} matches the age recipient",
                identity.source
            )),
            other => BackendError::InvalidState(format!("age decryption failed: {other}")),
        })?;

    let mut plaintext = Zeroizing::new(Vec::new());
    reader
        .read_to_end(&mut plaintext)
        .map_err(|e| BackendError::InvalidState(format!("reading age payload: {e}")))?;

    Ok(plaintext)
}

fn unusable_identity(identity: &IdentityProvider, e: impl std::fmt::Display) -> BackendError {
    BackendError::Unavailable(format!("age identity from {} is unusable: {e}", identity.source))
}
