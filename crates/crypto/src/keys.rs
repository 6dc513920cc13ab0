//! Key material containers.
//!
//! Private halves are held as PEM strings that are wiped from memory on drop
//! and never printed by `Debug`.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::SignatureAlgorithm;

/// Length of every symmetric key used by this crate.
pub const KEY_LEN: usize = 32;

/// PEM-encoded (PKCS#8) private key, securely wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKeyPem(String);

impl PrivateKeyPem {
    pub fn new(pem: impl Into<String>) -> Self {
        Self(pem.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PrivateKeyPem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKeyPem([REDACTED])")
    }
}

/// Long-term identity keypair used only to sign and verify.
#[derive(Debug, Clone)]
pub struct SigningKeyPair {
    pub algorithm: SignatureAlgorithm,
    pub private: PrivateKeyPem,
    /// SubjectPublicKeyInfo PEM.
    pub public: String,
}

/// Session-scoped Diffie-Hellman keypair.
#[derive(Debug, Clone)]
pub struct AgreementKeyPair {
    pub private: PrivateKeyPem,
    /// SubjectPublicKeyInfo PEM.
    pub public: String,
}

/// Both keypairs minted for a new identity.
#[derive(Debug, Clone)]
pub struct IdentityKeys {
    pub signing: SigningKeyPair,
    pub agreement: AgreementKeyPair,
}

/// A 32-byte symmetric key derived from a key agreement.
///
/// Sensitive: never log or persist it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey {
    key: [u8; KEY_LEN],
}

impl SharedKey {
    pub fn from_bytes(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}
