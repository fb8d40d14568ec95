//! treeseal: selective encryption of structured documents
//!
//! A document is loaded by a [`Store`] into a [`TreeBranch`], the
//! [`Engine`] encrypts every leaf under a fresh data key bound to the leaf's
//! path, and the data key is wrapped by each configured master key. The
//! result is written back with a metadata block under the top-level `sops`
//! key.
//!
//! ```text
//! store.load ─▶ TreeBranch ─▶ Engine::encrypt ─▶ (TreeBranch, Metadata) ─▶ store.dump_with_metadata
//! store.load + store.load_metadata ─▶ Engine::decrypt (MAC verified) ─▶ TreeBranch ─▶ store.dump
//! ```

pub mod engine;
pub mod file;
pub mod keyring;
pub mod metadata;
pub mod store;
mod transform;

pub use engine::{
    key_sources_from_config, DecryptOptions, Encrypted, Engine, EngineConfig, Rewrapped,
};
pub use keyring::KeyFailure;
pub use metadata::{Metadata, DEFAULT_UNENCRYPTED_SUFFIX, FORMAT_VERSION, METADATA_KEY};
pub use store::{store_for_path, JsonStore, Store, YamlStore};

pub use tokio_util::sync::CancellationToken;
pub use treeseal_core::{
    BackendError, ErrorClass, Scalar, ScalarKind, TreeBranch, TreePath, TreesealError,
    TreesealResult, Value,
};
pub use treeseal_crypto::DataKey;
pub use treeseal_keys::{
    find_age_identity, AgeMasterKey, Backends, GpgCli, IdentityProvider, KeyKind, KeySource,
    KmsClient, KmsMasterKey, LocalKms, MasterKey, PgpClient, PgpMasterKey,
};
