//! Algorithm selection and key-storage settings.
//!
//! Loaded from a TOML document with environment variable overrides. Each
//! algorithm is a closed enum fixed when an engine is constructed.

use std::str::FromStr;

use serde::Deserialize;

use crate::error::CryptoError;

/// Authenticated symmetric cipher used for messages and vault entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymmetricAlgorithm {
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

/// Signature scheme for the long-term identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureAlgorithm {
    /// ECDSA over NIST P-256 with SHA-256, DER-encoded signatures.
    #[default]
    #[serde(rename = "ecdsa-p256")]
    EcdsaP256,
    Ed25519,
}

/// Key-agreement scheme for session keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgreementAlgorithm {
    #[default]
    X25519,
}

/// Password-based key derivation used to wrap the master key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PasswordKdf {
    #[default]
    #[serde(rename = "pbkdf2-sha512")]
    Pbkdf2Sha512,
    Argon2id,
}

impl FromStr for SymmetricAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aes-256-gcm" => Ok(Self::Aes256Gcm),
            "chacha20-poly1305" => Ok(Self::ChaCha20Poly1305),
            other => Err(CryptoError::Config(format!("unknown symmetric cipher: {other}"))),
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ecdsa-p256" => Ok(Self::EcdsaP256),
            "ed25519" => Ok(Self::Ed25519),
            other => Err(CryptoError::Config(format!("unknown signature algorithm: {other}"))),
        }
    }
}

impl FromStr for PasswordKdf {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pbkdf2-sha512" => Ok(Self::Pbkdf2Sha512),
            "argon2id" => Ok(Self::Argon2id),
            other => Err(CryptoError::Config(format!("unknown password kdf: {other}"))),
        }
    }
}

/// Crypto core configuration loaded from TOML with env var overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct CryptoConfig {
    /// Default: aes-256-gcm
    #[serde(default)]
    pub symmetric_cipher: SymmetricAlgorithm,
    /// Default: ecdsa-p256
    #[serde(default)]
    pub signature_algorithm: SignatureAlgorithm,
    /// Default: x25519
    #[serde(default)]
    pub agreement_algorithm: AgreementAlgorithm,
    /// Default: pbkdf2-sha512
    #[serde(default)]
    pub password_kdf: PasswordKdf,
    /// PBKDF2 iteration count. Default: 210000
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
    /// HKDF info string bound into every derived message key.
    #[serde(default = "default_agreement_info")]
    pub agreement_info: String,
    /// Prefix for secret-store service tags. Default: "apata_messenger"
    #[serde(default = "default_service_prefix")]
    pub service_prefix: String,
}

fn default_kdf_iterations() -> u32 {
    210_000
}
fn default_agreement_info() -> String {
    "apata_messenger_x25519".to_string()
}
fn default_service_prefix() -> String {
    "apata_messenger".to_string()
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            symmetric_cipher: SymmetricAlgorithm::default(),
            signature_algorithm: SignatureAlgorithm::default(),
            agreement_algorithm: AgreementAlgorithm::default(),
            password_kdf: PasswordKdf::default(),
            kdf_iterations: default_kdf_iterations(),
            agreement_info: default_agreement_info(),
            service_prefix: default_service_prefix(),
        }
    }
}

impl CryptoConfig {
    /// Load configuration from a TOML file, then apply env var overrides.
    ///
    /// Reads the path in `APATA_CRYPTO_CONFIG`, falling back to `crypto.toml`
    /// in the working directory. A missing file yields the defaults.
    pub fn load() -> Result<Self, CryptoError> {
        let path =
            std::env::var("APATA_CRYPTO_CONFIG").unwrap_or_else(|_| "crypto.toml".to_string());
        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut config = Self::default();
                config.apply_env_overrides()?;
                config.validate()?;
                Ok(config)
            }
            Err(e) => Err(CryptoError::Config(format!("cannot read {path}: {e}"))),
        }
    }

    /// Load configuration from a TOML string, then apply env var overrides.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, CryptoError> {
        let mut config: CryptoConfig =
            toml::from_str(toml_str).map_err(|e| CryptoError::Config(e.to_string()))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the config.
    ///
    /// Returns an error if an env var is set but holds an invalid value
    /// (e.g., APATA_KDF_ITERATIONS=abc).
    pub fn apply_env_overrides(&mut self) -> Result<(), CryptoError> {
        if let Ok(val) = std::env::var("APATA_SYMMETRIC_CIPHER") {
            self.symmetric_cipher = val.parse()?;
        }
        if let Ok(val) = std::env::var("APATA_SIGNATURE_ALGORITHM") {
            self.signature_algorithm = val.parse()?;
        }
        if let Ok(val) = std::env::var("APATA_PASSWORD_KDF") {
            self.password_kdf = val.parse()?;
        }
        if let Ok(val) = std::env::var("APATA_KDF_ITERATIONS") {
            self.kdf_iterations = val
                .parse()
                .map_err(|_| CryptoError::Config(format!("invalid APATA_KDF_ITERATIONS value: {val}")))?;
        }
        if let Ok(val) = std::env::var("APATA_SERVICE_PREFIX") {
            self.service_prefix = val;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), CryptoError> {
        if self.kdf_iterations == 0 {
            return Err(CryptoError::Config("kdf_iterations must be at least 1".into()));
        }
        if self.agreement_info.is_empty() {
            return Err(CryptoError::Config("agreement_info must not be empty".into()));
        }
        if self.service_prefix.is_empty() {
            return Err(CryptoError::Config("service_prefix must not be empty".into()));
        }
        if self.kdf_iterations < 100_000 {
            tracing::warn!(
                iterations = self.kdf_iterations,
                "kdf_iterations below 100000; acceptable for tests only"
            );
        }
        Ok(())
    }
}
