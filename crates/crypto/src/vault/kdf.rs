//! Password-based key derivation for wrapping the master key.

use hmac::Hmac;
use rand::RngCore;
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::config::PasswordKdf;
use crate::error::CryptoError;
use crate::keys::KEY_LEN;

pub const SALT_LEN: usize = 16;

/// A password-derived wrapping key and the salt that produced it.
pub struct PasswordKey {
    pub key: Zeroizing<[u8; KEY_LEN]>,
    pub salt: Vec<u8>,
}

impl std::fmt::Debug for PasswordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordKey")
            .field("key", &"[REDACTED]")
            .field("salt", &self.salt)
            .finish()
    }
}

/// Generate a random 16-byte salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    salt
}

/// Stretch `password` into a 32-byte key.
///
/// `iterations` applies to PBKDF2 only; Argon2id runs with fixed
/// memory-hard parameters.
pub fn derive_key(
    kdf: PasswordKdf,
    password: &str,
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::InvalidInput("password cannot be empty".into()));
    }
    if salt.len() < SALT_LEN {
        return Err(CryptoError::InvalidInput("salt too short".into()));
    }

    let mut output = Zeroizing::new([0u8; KEY_LEN]);
    match kdf {
        PasswordKdf::Pbkdf2Sha512 => {
            if iterations == 0 {
                return Err(CryptoError::InvalidInput("iterations must be at least 1".into()));
            }
            pbkdf2::pbkdf2::<Hmac<Sha512>>(password.as_bytes(), salt, iterations, output.as_mut())
                .map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        }
        PasswordKdf::Argon2id => {
            let params = argon2::Params::new(65536, 3, 4, Some(KEY_LEN))
                .map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
            let argon2 =
                argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
            argon2
                .hash_password_into(password.as_bytes(), salt, output.as_mut())
                .map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITERATIONS: u32 = 1_000;

    fn pbkdf2(password: &str, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
        derive_key(PasswordKdf::Pbkdf2Sha512, password, salt, ITERATIONS).unwrap()
    }

    #[test]
    fn test_same_password_same_salt_produces_same_key() {
        assert_eq!(*pbkdf2("same-pass", &[1u8; 16]), *pbkdf2("same-pass", &[1u8; 16]));
    }

    #[test]
    fn test_different_password_produces_different_key() {
        assert_ne!(*pbkdf2("password1", &[2u8; 16]), *pbkdf2("password2", &[2u8; 16]));
    }

    #[test]
    fn test_different_salt_produces_different_key() {
        assert_ne!(*pbkdf2("same-pass", &[3u8; 16]), *pbkdf2("same-pass", &[4u8; 16]));
    }

    #[test]
    fn test_iteration_count_changes_key() {
        let a = derive_key(PasswordKdf::Pbkdf2Sha512, "pw", &[5u8; 16], 1_000).unwrap();
        let b = derive_key(PasswordKdf::Pbkdf2Sha512, "pw", &[5u8; 16], 1_001).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_argon2id_is_deterministic() {
        let a = derive_key(PasswordKdf::Argon2id, "pw", &[6u8; 16], 0).unwrap();
        let b = derive_key(PasswordKdf::Argon2id, "pw", &[6u8; 16], 0).unwrap();
        assert_eq!(*a, *b);
        assert_ne!(*a, *pbkdf2("pw", &[6u8; 16]));
    }

    #[test]
    fn test_salt_too_short_returns_error() {
        let result = derive_key(PasswordKdf::Pbkdf2Sha512, "pass", &[0u8; 8], ITERATIONS);
        assert!(matches!(result, Err(CryptoError::InvalidInput(_))));
    }

    #[test]
    fn test_empty_password_returns_error() {
        let result = derive_key(PasswordKdf::Pbkdf2Sha512, "", &[0u8; 16], ITERATIONS);
        assert!(matches!(result, Err(CryptoError::InvalidInput(_))));
    }

    #[test]
    fn test_generate_salt_is_random() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
