//! Authenticated symmetric encryption for messages and vault entries.
//!
//! Message ciphertexts travel as `base64(nonce ‖ ciphertext ‖ tag)`. Vault
//! entries reorder the same parts as `nonce ‖ tag ‖ ciphertext`; see
//! [`Sealed`].

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::Aes256Gcm;
use base64::Engine;
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::config::{CryptoConfig, SymmetricAlgorithm};
use crate::error::CryptoError;
use crate::keys::KEY_LEN;

/// 96-bit nonce for both AEADs.
pub const NONCE_LEN: usize = 12;
/// 128-bit authentication tag.
pub const TAG_LEN: usize = 16;
/// Smallest decoded ciphertext: an empty body still carries nonce and tag.
pub const MIN_CIPHERTEXT_LEN: usize = NONCE_LEN + TAG_LEN;

/// The three parts of one AEAD encryption, kept apart so callers can lay
/// them out in whichever order their storage format requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_LEN],
    pub body: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

impl Sealed {
    /// `nonce ‖ body ‖ tag`, the message wire layout.
    pub fn to_message_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MIN_CIPHERTEXT_LEN + self.body.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.body);
        out.extend_from_slice(&self.tag);
        out
    }

    pub fn from_message_bytes(data: &[u8]) -> Result<Self, CryptoError> {
        check_len(data)?;
        let (nonce, rest) = data.split_at(NONCE_LEN);
        let (body, tag) = rest.split_at(rest.len() - TAG_LEN);
        Ok(Self::from_parts(nonce, body, tag))
    }

    /// `nonce ‖ tag ‖ body`, the vault entry layout.
    pub fn to_vault_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MIN_CIPHERTEXT_LEN + self.body.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.body);
        out
    }

    pub fn from_vault_bytes(data: &[u8]) -> Result<Self, CryptoError> {
        check_len(data)?;
        let (nonce, rest) = data.split_at(NONCE_LEN);
        let (tag, body) = rest.split_at(TAG_LEN);
        Ok(Self::from_parts(nonce, body, tag))
    }

    fn from_parts(nonce: &[u8], body: &[u8], tag: &[u8]) -> Self {
        let mut n = [0u8; NONCE_LEN];
        n.copy_from_slice(nonce);
        let mut t = [0u8; TAG_LEN];
        t.copy_from_slice(tag);
        Self {
            nonce: n,
            body: body.to_vec(),
            tag: t,
        }
    }
}

fn check_len(data: &[u8]) -> Result<(), CryptoError> {
    if data.len() < MIN_CIPHERTEXT_LEN {
        return Err(CryptoError::InvalidCiphertext(format!(
            "ciphertext too short: {} bytes, need at least {MIN_CIPHERTEXT_LEN}",
            data.len()
        )));
    }
    Ok(())
}

fn check_key(key: &[u8]) -> Result<(), CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKey(format!(
            "symmetric key must be {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Ok(())
}

/// AEAD encryption under a 256-bit key with the configured algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymmetricCipher {
    algorithm: SymmetricAlgorithm,
}

impl SymmetricCipher {
    pub fn new(algorithm: SymmetricAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn from_config(config: &CryptoConfig) -> Self {
        Self::new(config.symmetric_cipher)
    }

    pub fn algorithm(&self) -> SymmetricAlgorithm {
        self.algorithm
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8], key: &[u8]) -> Result<Sealed, CryptoError> {
        check_key(key)?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let mut body = plaintext.to_vec();
        let tag = match self.algorithm {
            SymmetricAlgorithm::Aes256Gcm => seal_in_place::<Aes256Gcm>(key, &nonce, &mut body)?,
            SymmetricAlgorithm::ChaCha20Poly1305 => {
                seal_in_place::<ChaCha20Poly1305>(key, &nonce, &mut body)?
            }
        };
        Ok(Sealed { nonce, body, tag })
    }

    /// Authenticate and decrypt `sealed`. A tag mismatch is
    /// `AuthenticationFailed`.
    pub fn open(&self, sealed: &Sealed, key: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        check_key(key)?;
        let mut buffer = Zeroizing::new(sealed.body.clone());
        match self.algorithm {
            SymmetricAlgorithm::Aes256Gcm => {
                open_in_place::<Aes256Gcm>(key, &sealed.nonce, &sealed.tag, &mut buffer)?
            }
            SymmetricAlgorithm::ChaCha20Poly1305 => {
                open_in_place::<ChaCha20Poly1305>(key, &sealed.nonce, &sealed.tag, &mut buffer)?
            }
        }
        Ok(buffer)
    }

    /// Encrypt a UTF-8 string, returning `base64(nonce ‖ ciphertext ‖ tag)`.
    pub fn encrypt(&self, plaintext: &str, key: &[u8]) -> Result<String, CryptoError> {
        let sealed = self.seal(plaintext.as_bytes(), key)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(sealed.to_message_bytes()))
    }

    /// Reverse of [`encrypt`](Self::encrypt).
    ///
    /// `InvalidCiphertext` for undecodable or truncated input,
    /// `AuthenticationFailed` for a wrong key or tampered data.
    pub fn decrypt(&self, ciphertext: &str, key: &[u8]) -> Result<String, CryptoError> {
        if ciphertext.is_empty() {
            return Err(CryptoError::InvalidCiphertext("ciphertext cannot be empty".into()));
        }
        let data = base64::engine::general_purpose::STANDARD.decode(ciphertext)?;
        let sealed = Sealed::from_message_bytes(&data)?;
        let plaintext = self.open(&sealed, key)?;
        String::from_utf8(plaintext.to_vec())
            .map_err(|_| CryptoError::InvalidCiphertext("plaintext is not valid UTF-8".into()))
    }
}

fn seal_in_place<A: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
    buffer: &mut [u8],
) -> Result<[u8; TAG_LEN], CryptoError> {
    let cipher = A::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let tag = cipher
        .encrypt_in_place_detached(aes_gcm::aead::Nonce::<A>::from_slice(nonce), b"", buffer)
        .map_err(|_| CryptoError::InvalidInput("plaintext too long to encrypt".into()))?;
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&tag);
    Ok(out)
}

fn open_in_place<A: AeadInPlace + KeyInit>(
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
    tag: &[u8; TAG_LEN],
    buffer: &mut [u8],
) -> Result<(), CryptoError> {
    let cipher = A::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    cipher
        .decrypt_in_place_detached(
            aes_gcm::aead::Nonce::<A>::from_slice(nonce),
            b"",
            buffer,
            aes_gcm::aead::Tag::<A>::from_slice(tag),
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}
