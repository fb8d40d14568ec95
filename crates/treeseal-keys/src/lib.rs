//! treeseal-keys: master keys that wrap a document's data key
//!
//! A document lists its master keys in metadata, grouped by kind:
//!   - `kms`: cloud KMS key (ARN + optional role), blob is base64
//!   - `pgp`: PGP key by fingerprint, blob is an armored PGP message
//!   - `age`: X25519 recipient, blob is an armored age file
//!
//! Any single key that unwraps is enough to decrypt the document. Backend
//! clients live in [`Backends`] and are shared process-wide.

pub mod age;
pub mod backends;
pub mod identity;
pub mod kms;
pub mod master_key;
pub mod pgp;

pub use crate::age::AgeMasterKey;
pub use backends::Backends;
pub use identity::{find_age_identity, IdentityProvider};
pub use kms::{KmsClient, KmsMasterKey, LocalKms};
pub use master_key::{KeyKind, KeySource, MasterKey};
pub use pgp::{GpgCli, PgpClient, PgpMasterKey};
