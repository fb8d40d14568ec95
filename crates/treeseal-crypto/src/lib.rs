//! treeseal-crypto: leaf-level encryption for structured documents
//!
//! Key hierarchy:
//! ```text
//! Master keys (KMS / PGP / age, see treeseal-keys)
//!   └── wrap ── Data Key (per-document, 256-bit random)
//!                 ├── Leaf AEAD: AES-256-GCM (iv=random 96-bit, AAD=rendered leaf path)
//!                 └── MAC AEAD:  AES-256-GCM (iv=random 96-bit, AAD=lastmodified)
//! ```
//!
//! Leaves are stored as `ENC[AES256_GCM,data:…,iv:…,tag:…,type:…]` strings.

pub mod cipher;
pub mod keys;
pub mod mac;

pub use cipher::{decrypt_scalar, encrypt_scalar, is_encrypted_value, CipherError, EncryptedValue};
pub use keys::{generate_data_key, DataKey};
pub use mac::{macs_match, MacBuilder};

/// Size of a data key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;
