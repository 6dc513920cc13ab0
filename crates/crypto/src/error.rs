//! Error types for the apata-crypto crate.

use thiserror::Error;

/// Errors that can occur during cryptographic and key-storage operations.
///
/// A signature that simply does not match is *not* an error: verification
/// returns `Ok(false)`. The variants here are reserved for malformed input,
/// failed authentication, and infrastructure faults.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material is malformed, the wrong length, or the wrong type.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Caller supplied input that cannot be processed (e.g. empty message).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A signature could not be decoded.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// Ciphertext is not valid base64 or is too short to contain nonce and tag.
    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// AEAD tag mismatch: wrong key, wrong password, or tampered data.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// An identity-binding signature did not verify. Probable attack.
    #[error("security error: {0}")]
    SecurityError(String),

    /// The platform secret store could not be reached.
    #[error("vault unavailable: {0}")]
    VaultUnavailable(String),

    /// No vault entry exists for the requested owner and tag.
    #[error("vault entry not found: {tag} for {owner}")]
    NotFound { owner: String, tag: String },

    /// The secret store rejected the operation for a reason other than
    /// availability.
    #[error("storage error: {0}")]
    Storage(String),

    /// The key directory could not be queried or updated.
    #[error("directory error: {0}")]
    Directory(String),

    /// The message transport rejected or failed to deliver a message.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration could not be parsed or holds an invalid value.
    #[error("config error: {0}")]
    Config(String),

    /// A background worker panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

impl CryptoError {
    /// True for outcomes that must be reported as security events rather than
    /// ordinary failures.
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            CryptoError::SecurityError(_) | CryptoError::AuthenticationFailed
        )
    }

    /// True for infrastructure failures a caller may retry at its discretion.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CryptoError::VaultUnavailable(_) | CryptoError::Directory(_) | CryptoError::Transport(_)
        )
    }
}

impl From<keyring::Error> for CryptoError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoEntry => CryptoError::NotFound {
                owner: String::new(),
                tag: String::new(),
            },
            keyring::Error::NoStorageAccess(e) | keyring::Error::PlatformFailure(e) => {
                CryptoError::VaultUnavailable(e.to_string())
            }
            other => CryptoError::Storage(other.to_string()),
        }
    }
}

impl From<base64::DecodeError> for CryptoError {
    fn from(err: base64::DecodeError) -> Self {
        CryptoError::InvalidCiphertext(format!("invalid base64: {err}"))
    }
}

impl From<tokio::task::JoinError> for CryptoError {
    fn from(err: tokio::task::JoinError) -> Self {
        CryptoError::Task(err.to_string())
    }
}

impl CryptoError {
    /// Converts an error from a password unlock (`login`,
    /// `KeyVault::get_master_key`, `KeyVault::change_password`), where a
    /// failed tag on the master key means the password was wrong.
    pub fn into_unlock_error(self) -> apata_shared::error::ApataError {
        match self {
            CryptoError::AuthenticationFailed => apata_shared::error::ApataError::WrongPassword,
            other => other.into(),
        }
    }
}

impl From<CryptoError> for apata_shared::error::ApataError {
    fn from(err: CryptoError) -> Self {
        use apata_shared::error::ApataError;
        match err {
            CryptoError::SecurityError(detail) => ApataError::SecurityViolation(detail),
            CryptoError::AuthenticationFailed => ApataError::AuthenticationFailed,
            CryptoError::NotFound { .. } => ApataError::NotFound,
            CryptoError::VaultUnavailable(detail)
            | CryptoError::Directory(detail)
            | CryptoError::Transport(detail) => ApataError::ServiceUnavailable(detail),
            CryptoError::InvalidInput(detail) => ApataError::Validation(detail),
            CryptoError::Task(detail) | CryptoError::Config(detail) => ApataError::Internal(detail),
            other => ApataError::Crypto(other.to_string()),
        }
    }
}
