//! X25519 key agreement followed by HKDF-SHA512.

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha512;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::config::{AgreementAlgorithm, CryptoConfig};
use crate::error::CryptoError;
use crate::keys::{AgreementKeyPair, PrivateKeyPem, SharedKey, KEY_LEN};
use crate::pem;

pub const DEFAULT_INFO: &str = "apata_messenger_x25519";

/// Derives symmetric keys from a Diffie-Hellman exchange.
///
/// The HKDF step uses no salt and a fixed info string, so both sides of a
/// conversation derive the same key from `(own private, peer public)`.
#[derive(Debug, Clone)]
pub struct KeyAgreementEngine {
    algorithm: AgreementAlgorithm,
    info: String,
}

impl Default for KeyAgreementEngine {
    fn default() -> Self {
        Self::new(AgreementAlgorithm::X25519, DEFAULT_INFO)
    }
}

impl KeyAgreementEngine {
    pub fn new(algorithm: AgreementAlgorithm, info: impl Into<String>) -> Self {
        Self {
            algorithm,
            info: info.into(),
        }
    }

    pub fn from_config(config: &CryptoConfig) -> Self {
        Self::new(config.agreement_algorithm, config.agreement_info.clone())
    }

    pub fn algorithm(&self) -> AgreementAlgorithm {
        self.algorithm
    }

    pub fn generate_keypair(&self) -> Result<AgreementKeyPair, CryptoError> {
        match self.algorithm {
            AgreementAlgorithm::X25519 => {
                let mut raw = Zeroizing::new([0u8; 32]);
                rand::rng().fill_bytes(raw.as_mut());
                let secret = StaticSecret::from(*raw);
                let public = PublicKey::from(&secret);
                let private = pem::encode_private(&secret.to_bytes());
                Ok(AgreementKeyPair {
                    private: PrivateKeyPem::new(private.as_str()),
                    public: pem::encode_public(public.as_bytes()),
                })
            }
        }
    }

    /// Recompute the public PEM that belongs to `private_key`.
    pub fn public_key(&self, private_key: &str) -> Result<String, CryptoError> {
        let secret = load_secret(private_key)?;
        Ok(pem::encode_public(PublicKey::from(&secret).as_bytes()))
    }

    /// Diffie-Hellman between `own_private` and `peer_public`, expanded to a
    /// 32-byte key with HKDF-SHA512.
    ///
    /// A peer key that forces an all-zero shared secret (a small-order point)
    /// is rejected as `InvalidKey`.
    pub fn derive_shared_secret(
        &self,
        own_private: &str,
        peer_public: &str,
    ) -> Result<SharedKey, CryptoError> {
        let secret = load_secret(own_private)?;
        let peer = PublicKey::from(pem::decode_public(peer_public)?);

        let shared = secret.diffie_hellman(&peer);
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKey(
                "peer public key is a low-order point".into(),
            ));
        }

        let hk = Hkdf::<Sha512>::new(None, shared.as_bytes());
        let mut okm = [0u8; KEY_LEN];
        hk.expand(self.info.as_bytes(), &mut okm)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let key = SharedKey::from_bytes(okm);
        zeroize::Zeroize::zeroize(&mut okm);
        Ok(key)
    }
}

fn load_secret(private_key: &str) -> Result<StaticSecret, CryptoError> {
    let raw = pem::decode_private(private_key)?;
    Ok(StaticSecret::from(*raw))
}
