use thiserror::Error;

pub type CfoldResult<T> = Result<T, CfoldError>;

#[derive(Debug, Error)]
pub enum CfoldError {
    /// Malformed delimiter, base64, JSON or key encoding.
    #[error("format error: {0}")]
    Format(String),

    /// A required algorithm or parameter set is not available.
    #[error("crypto unavailable: {0}")]
    CryptoUnavailable(String),

    /// GCM tag mismatch, from the AEAD primitive or the explicit tag compare.
    #[error("authentication failure: {0}")]
    Authentication(String),

    /// Stored checksum does not match the recomputed one.
    #[error("integrity failure: {0}")]
    Integrity(String),

    /// Empty checksum on a folder that was already migrated.
    #[error("possible downgrade attack detected on folder {folder_id}")]
    DowngradeDetected { folder_id: u64 },

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Private key does not belong to the advertised certificate.
    #[error("key mismatch: {0}")]
    KeyMismatch(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures reported by the remote metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The folder is locked by another client.
    #[error("locked: {0}")]
    Locked(String),

    /// The metadata changed on the server since it was read.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transport: {0}")]
    Transport(String),
}

/// What the user should be told, which decides the remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    WrongPassword,
    Tampering,
    Network,
    Malformed,
    Environment,
}

impl CfoldError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CfoldError::KeyMismatch(_) => ErrorClass::WrongPassword,
            CfoldError::Authentication(_)
            | CfoldError::Integrity(_)
            | CfoldError::DowngradeDetected { .. } => ErrorClass::Tampering,
            CfoldError::Remote(_) => ErrorClass::Network,
            CfoldError::Format(_) => ErrorClass::Malformed,
            CfoldError::CryptoUnavailable(_)
            | CfoldError::Config(_)
            | CfoldError::Io(_)
            | CfoldError::Other(_) => ErrorClass::Environment,
        }
    }

    /// True for failures that indicate the metadata was tampered with.
    pub fn is_security_failure(&self) -> bool {
        self.class() == ErrorClass::Tampering
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CfoldError::Remote(RemoteError::NotFound(_)))
    }
}
