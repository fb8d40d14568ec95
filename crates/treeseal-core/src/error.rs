use thiserror::Error;

pub type TreesealResult<T> = Result<T, TreesealError>;

/// Per-key failure reported by a master-key backend.
///
/// Raw transport errors are classified into one of these at the master-key
/// boundary and never surface further up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Network, process, credential or timeout failure. Retrying may help.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend's access policy rejected the request.
    #[error("access denied: {0}")]
    Denied(String),

    /// The key is disabled, unknown, or the stored blob is unusable.
    #[error("key in invalid state: {0}")]
    InvalidState(String),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum TreesealError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("no metadata block found (is this document encrypted?)")]
    MetadataNotFound,

    #[error("document already carries a metadata block")]
    AlreadyEncrypted,

    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("malformed {kind} key entry: {reason}")]
    MalformedKeyEntry { kind: String, reason: String },

    #[error("malformed timestamp {value:?}: {reason}")]
    MalformedTimestamp { value: String, reason: String },

    #[error("no master key could {action} the data key ({attempts} attempted); check access to the configured keys")]
    NoKeyAvailable {
        action: &'static str,
        attempts: usize,
        #[source]
        last: Option<BackendError>,
    },

    #[error("recovered data key does not match this document: {0}")]
    InvalidDataKey(String),

    #[error("ciphertext at {path} is bound to {bound_to}; document may have been tampered with or corrupted")]
    PathBindingViolation { path: String, bound_to: String },

    #[error("integrity check failed: {0}; document may have been tampered with or corrupted")]
    IntegrityCheckFailed(String),

    #[error("could not compute document MAC: {0}")]
    IntegrityComputationFailed(String),

    #[error("encryption failed at {path}: {reason}")]
    EncryptionFailed { path: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse grouping used to pick a remediation: fix the input, fix key
/// access, or investigate the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Input,
    KeyAccess,
    Tampering,
    Cancelled,
    Internal,
}

impl TreesealError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TreesealError::Parse(_)
            | TreesealError::MetadataNotFound
            | TreesealError::AlreadyEncrypted
            | TreesealError::MalformedMetadata(_)
            | TreesealError::MalformedKeyEntry { .. }
            | TreesealError::MalformedTimestamp { .. }
            | TreesealError::Config(_) => ErrorClass::Input,
            TreesealError::NoKeyAvailable { .. } | TreesealError::InvalidDataKey(_) => {
                ErrorClass::KeyAccess
            }
            TreesealError::PathBindingViolation { .. } | TreesealError::IntegrityCheckFailed(_) => {
                ErrorClass::Tampering
            }
            TreesealError::Cancelled => ErrorClass::Cancelled,
            TreesealError::Serialize(_)
            | TreesealError::IntegrityComputationFailed(_)
            | TreesealError::EncryptionFailed { .. }
            | TreesealError::Io(_) => ErrorClass::Internal,
        }
    }

    pub fn is_tampering(&self) -> bool {
        self.class() == ErrorClass::Tampering
    }
}
