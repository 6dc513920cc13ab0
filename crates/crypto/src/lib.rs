//! apata-crypto — end-to-end encryption core for Apata messenger.
//!
//! Provides identity signatures (ECDSA P-256 or Ed25519), X25519 key
//! agreement with HKDF-SHA512, AEAD message encryption, the signed-key
//! message protocol, a password-gated key vault backed by the OS keychain,
//! and agreement key rotation.

pub mod error;
pub mod config;
pub mod keys;
mod pem;
mod task;
pub mod signature;
pub mod agreement;
pub mod cipher;
pub mod protocol;
pub mod vault;
pub mod identity;
pub mod session;
pub mod directory;
pub mod messaging;

pub use config::CryptoConfig;
pub use error::CryptoError;
pub use identity::SessionContext;
pub use protocol::{EncryptedEnvelope, EncryptionProtocol};
pub use vault::KeyVault;
