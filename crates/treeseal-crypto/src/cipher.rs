//! Per-leaf AES-256-GCM encryption
//!
//! Encrypted leaf format (string, replaces the leaf in place):
//! ```text
//! ENC[AES256_GCM,data:<b64 ciphertext>,iv:<b64 12 bytes>,tag:<b64 16 bytes>,type:<str|int|float|bool>]
//! AAD = rendered leaf path (e.g. "db.password")
//! ```
//!
//! The AAD binds each ciphertext to its location, so a value copied to a
//! different key fails authentication. The `type` tag is not authenticated by
//! the AEAD; the document MAC covers it instead.

use std::fmt;
use std::str::FromStr;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use rand::RngCore;
use thiserror::Error;
use treeseal_core::{Scalar, ScalarKind};
use zeroize::Zeroizing;

use crate::keys::DataKey;
use crate::{NONCE_SIZE, TAG_SIZE};

const PREFIX: &str = "ENC[AES256_GCM,";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("malformed encrypted value: {0}")]
    Malformed(String),

    #[error("authentication failed: wrong key, tampered ciphertext, or mismatched additional data")]
    Authentication,

    #[error("decrypted payload is not a valid {kind} value")]
    InvalidPayload { kind: ScalarKind },

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("data key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}

/// A parsed `ENC[...]` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedValue {
    pub data: Vec<u8>,
    pub iv: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
    pub kind: ScalarKind,
}

/// Cheap syntactic check, no decoding.
pub fn is_encrypted_value(s: &str) -> bool {
    s.starts_with(PREFIX) && s.ends_with(']')
}

impl fmt::Display for EncryptedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{PREFIX}data:{},iv:{},tag:{},type:{}]",
            B64.encode(&self.data),
            B64.encode(self.iv),
            B64.encode(self.tag),
            self.kind
        )
    }
}

impl FromStr for EncryptedValue {
    type Err = CipherError;

    fn from_str(enc: &str) -> Result<Self, Self::Err> {
        let inner = enc
            .strip_prefix(PREFIX)
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| CipherError::Malformed("not an ENC[AES256_GCM,...] value".into()))?;

        let mut data_b64 = None;
        let mut iv_b64 = None;
        let mut tag_b64 = None;
        let mut kind = None;

        for part in inner.split(',') {
            if let Some(v) = part.strip_prefix("data:") {
                data_b64 = Some(v);
            } else if let Some(v) = part.strip_prefix("iv:") {
                iv_b64 = Some(v);
            } else if let Some(v) = part.strip_prefix("tag:") {
                tag_b64 = Some(v);
            } else if let Some(v) = part.strip_prefix("type:") {
                kind = Some(v);
            } else {
                return Err(CipherError::Malformed(format!("unexpected field {part:?}")));
            }
        }

        let (Some(data_b64), Some(iv_b64), Some(tag_b64), Some(kind)) =
            (data_b64, iv_b64, tag_b64, kind)
        else {
            return Err(CipherError::Malformed(
                "missing one of data, iv, tag, type".into(),
            ));
        };

        let data = decode_field("data", data_b64)?;
        let iv = decode_field("iv", iv_b64)?;
        let tag = decode_field("tag", tag_b64)?;
        let kind = kind
            .parse::<ScalarKind>()
            .map_err(|e| CipherError::Malformed(e.to_string()))?;

        let iv: [u8; NONCE_SIZE] = iv
            .try_into()
            .map_err(|v: Vec<u8>| CipherError::Malformed(format!("iv must be {NONCE_SIZE} bytes, got {}", v.len())))?;
        let tag: [u8; TAG_SIZE] = tag
            .try_into()
            .map_err(|v: Vec<u8>| CipherError::Malformed(format!("tag must be {TAG_SIZE} bytes, got {}", v.len())))?;

        Ok(Self {
            data,
            iv,
            tag,
            kind,
        })
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, CipherError> {
    B64.decode(value)
        .map_err(|e| CipherError::Malformed(format!("base64 decode {name}: {e}")))
}

/// Encrypt a scalar under `key`, binding it to `aad`.
pub fn encrypt_scalar(
    key: &DataKey,
    scalar: &Scalar,
    aad: &str,
) -> Result<EncryptedValue, CipherError> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut iv = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let plaintext = Zeroizing::new(scalar.to_plaintext());
    let mut sealed = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext.as_bytes(),
                aad: aad.as_bytes(),
            },
        )
        .map_err(|e| CipherError::Encrypt(e.to_string()))?;

    // aes-gcm output: ciphertext || tag
    let tag_bytes = sealed.split_off(sealed.len() - TAG_SIZE);
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&tag_bytes);

    Ok(EncryptedValue {
        data: sealed,
        iv,
        tag,
        kind: scalar.kind(),
    })
}

/// Decrypt an envelope, checking it was bound to `aad`, and restore the
/// original scalar type.
pub fn decrypt_scalar(
    key: &DataKey,
    value: &EncryptedValue,
    aad: &str,
) -> Result<Scalar, CipherError> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut sealed = Vec::with_capacity(value.data.len() + TAG_SIZE);
    sealed.extend_from_slice(&value.data);
    sealed.extend_from_slice(&value.tag);

    let plaintext = Zeroizing::new(
        cipher
            .decrypt(
                Nonce::from_slice(&value.iv),
                Payload {
                    msg: &sealed,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| CipherError::Authentication)?,
    );

    let text = std::str::from_utf8(&plaintext)
        .map_err(|_| CipherError::InvalidPayload { kind: value.kind })?;
    Scalar::from_plaintext(value.kind, text).ok_or(CipherError::InvalidPayload { kind: value.kind })
}
