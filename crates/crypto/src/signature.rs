//! Identity signatures: keypair generation, signing, verification.
//!
//! A signature that does not match is reported as `Ok(false)`. Malformed keys
//! and undecodable signatures are errors, so a forged binding can never be
//! mistaken for a decoding bug.

use base64::Engine;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::config::{CryptoConfig, SignatureAlgorithm};
use crate::error::CryptoError;
use crate::keys::{PrivateKeyPem, SigningKeyPair};

/// Signs and verifies UTF-8 strings with the configured identity scheme.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureEngine {
    algorithm: SignatureAlgorithm,
}

impl SignatureEngine {
    pub fn new(algorithm: SignatureAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn from_config(config: &CryptoConfig) -> Self {
        Self::new(config.signature_algorithm)
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Generate a fresh signing keypair encoded as PKCS#8 / SPKI PEM.
    pub fn generate_keypair(&self) -> Result<SigningKeyPair, CryptoError> {
        let (private, public) = match self.algorithm {
            SignatureAlgorithm::EcdsaP256 => {
                let key = p256_random_signing_key();
                (p256_private_pem(&key)?, p256_public_pem(key.verifying_key())?)
            }
            SignatureAlgorithm::Ed25519 => {
                let mut seed = Zeroizing::new([0u8; 32]);
                rand::rng().fill_bytes(seed.as_mut());
                let key = ed25519_dalek::SigningKey::from_bytes(&seed);
                (ed25519_private_pem(&key)?, ed25519_public_pem(&key.verifying_key())?)
            }
        };
        Ok(SigningKeyPair {
            algorithm: self.algorithm,
            private,
            public,
        })
    }

    /// Recompute the public PEM that belongs to `private_key`.
    pub fn public_key(&self, private_key: &str) -> Result<String, CryptoError> {
        match self.algorithm {
            SignatureAlgorithm::EcdsaP256 => {
                let key = p256_load_private(private_key)?;
                p256_public_pem(key.verifying_key())
            }
            SignatureAlgorithm::Ed25519 => {
                let key = ed25519_load_private(private_key)?;
                ed25519_public_pem(&key.verifying_key())
            }
        }
    }

    /// Sign the UTF-8 bytes of `message`, returning a base64 signature.
    ///
    /// ECDSA signatures are DER-encoded over a SHA-256 digest; Ed25519
    /// signatures are the raw 64 bytes.
    pub fn sign(&self, private_key: &str, message: &str) -> Result<String, CryptoError> {
        if message.is_empty() {
            return Err(CryptoError::InvalidInput("message cannot be empty".into()));
        }
        let signature = match self.algorithm {
            SignatureAlgorithm::EcdsaP256 => {
                use p256::ecdsa::signature::Signer;
                let key = p256_load_private(private_key)?;
                let signature: p256::ecdsa::Signature = key.sign(message.as_bytes());
                signature.to_der().as_bytes().to_vec()
            }
            SignatureAlgorithm::Ed25519 => {
                use ed25519_dalek::Signer;
                let key = ed25519_load_private(private_key)?;
                key.sign(message.as_bytes()).to_bytes().to_vec()
            }
        };
        Ok(base64::engine::general_purpose::STANDARD.encode(signature))
    }

    /// Check `signature` over `message` against `public_key`.
    ///
    /// Returns `Ok(false)` on a cryptographic mismatch. Returns `InvalidKey`
    /// or `MalformedSignature` when the inputs cannot be parsed.
    pub fn verify(
        &self,
        public_key: &str,
        message: &str,
        signature: &str,
    ) -> Result<bool, CryptoError> {
        if message.is_empty() {
            return Err(CryptoError::InvalidInput("message cannot be empty".into()));
        }
        if signature.is_empty() {
            return Err(CryptoError::MalformedSignature("signature cannot be empty".into()));
        }
        let signature_bytes = base64::engine::general_purpose::STANDARD
            .decode(signature)
            .map_err(|e| CryptoError::MalformedSignature(format!("invalid base64 signature: {e}")))?;

        match self.algorithm {
            SignatureAlgorithm::EcdsaP256 => {
                use p256::ecdsa::signature::Verifier;
                use p256::pkcs8::DecodePublicKey;
                let key = p256::ecdsa::VerifyingKey::from_public_key_pem(public_key)
                    .map_err(|e| CryptoError::InvalidKey(format!("invalid P-256 public key: {e}")))?;
                let signature = p256::ecdsa::Signature::from_der(&signature_bytes)
                    .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
                Ok(key.verify(message.as_bytes(), &signature).is_ok())
            }
            SignatureAlgorithm::Ed25519 => {
                use ed25519_dalek::Verifier;
                use ed25519_dalek::pkcs8::DecodePublicKey;
                let key = ed25519_dalek::VerifyingKey::from_public_key_pem(public_key)
                    .map_err(|e| CryptoError::InvalidKey(format!("invalid Ed25519 public key: {e}")))?;
                let signature = ed25519_dalek::Signature::from_slice(&signature_bytes)
                    .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
                Ok(key.verify(message.as_bytes(), &signature).is_ok())
            }
        }
    }
}

fn p256_random_signing_key() -> p256::ecdsa::SigningKey {
    // A uniformly random 32-byte string is a valid scalar with overwhelming
    // probability; retry on the rare zero or out-of-range value.
    loop {
        let mut bytes = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(bytes.as_mut());
        if let Ok(key) = p256::ecdsa::SigningKey::from_slice(bytes.as_ref()) {
            return key;
        }
    }
}

fn p256_private_pem(key: &p256::ecdsa::SigningKey) -> Result<PrivateKeyPem, CryptoError> {
    use p256::pkcs8::{EncodePrivateKey, LineEnding};
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::InvalidKey(format!("cannot encode P-256 private key: {e}")))?;
    Ok(PrivateKeyPem::new(pem.as_str()))
}

fn p256_public_pem(key: &p256::ecdsa::VerifyingKey) -> Result<String, CryptoError> {
    use p256::pkcs8::{EncodePublicKey, LineEnding};
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::InvalidKey(format!("cannot encode P-256 public key: {e}")))
}

fn p256_load_private(private_key: &str) -> Result<p256::ecdsa::SigningKey, CryptoError> {
    use p256::pkcs8::DecodePrivateKey;
    if private_key.trim().is_empty() {
        return Err(CryptoError::InvalidKey("private key cannot be empty".into()));
    }
    p256::ecdsa::SigningKey::from_pkcs8_pem(private_key)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid P-256 private key: {e}")))
}

/// PKCS#8 v1 (RFC 8410 `OneAsymmetricKey` without the optional public key),
/// the layout other clients export.
fn ed25519_private_pem(key: &ed25519_dalek::SigningKey) -> Result<PrivateKeyPem, CryptoError> {
    use ed25519_dalek::pkcs8::{EncodePrivateKey, KeypairBytes};
    use p256::pkcs8::LineEnding;
    let bytes = KeypairBytes {
        secret_key: key.to_bytes(),
        public_key: None,
    };
    let pem = bytes
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::InvalidKey(format!("cannot encode Ed25519 private key: {e}")))?;
    Ok(PrivateKeyPem::new(pem.as_str()))
}

fn ed25519_public_pem(key: &ed25519_dalek::VerifyingKey) -> Result<String, CryptoError> {
    use ed25519_dalek::pkcs8::EncodePublicKey;
    use p256::pkcs8::LineEnding;
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::InvalidKey(format!("cannot encode Ed25519 public key: {e}")))
}

fn ed25519_load_private(private_key: &str) -> Result<ed25519_dalek::SigningKey, CryptoError> {
    use ed25519_dalek::pkcs8::DecodePrivateKey;
    if private_key.trim().is_empty() {
        return Err(CryptoError::InvalidKey("private key cannot be empty".into()));
    }
    ed25519_dalek::SigningKey::from_pkcs8_pem(private_key)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid Ed25519 private key: {e}")))
}
