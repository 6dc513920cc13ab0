//! Encrypted-at-rest private key storage.
//!
//! A random [`MasterKey`] is wrapped under a password-derived key and every
//! other private key is wrapped under the master key, so changing the
//! password only re-wraps one entry. Entries are base64 strings in a
//! [`SecretStore`]:
//!
//! - master key: `salt(16) ‖ nonce(12) ‖ tag(16) ‖ ciphertext`
//! - private keys: `nonce(12) ‖ tag(16) ‖ ciphertext`
//!
//! Writes to the same `(tag, owner)` entry are serialized.

pub mod kdf;
pub mod master_key;
pub mod store;

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::cipher::{Sealed, SymmetricCipher, MIN_CIPHERTEXT_LEN};
use crate::config::{CryptoConfig, PasswordKdf};
use crate::error::CryptoError;
use crate::keys::PrivateKeyPem;
use crate::task::offload;

pub use kdf::{PasswordKey, SALT_LEN};
pub use master_key::MasterKey;
pub use store::{KeyringSecretStore, MemorySecretStore, SecretStore};

/// Smallest decoded master-key entry.
pub const MIN_MASTER_ENTRY_LEN: usize = SALT_LEN + MIN_CIPHERTEXT_LEN;

/// The kinds of entry kept per owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaultTag {
    Master,
    Agreement,
    Signing,
}

impl VaultTag {
    pub const ALL: [VaultTag; 3] = [VaultTag::Master, VaultTag::Agreement, VaultTag::Signing];

    fn suffix(self) -> &'static str {
        match self {
            VaultTag::Master => "master_key",
            VaultTag::Agreement => "ecdh_key",
            VaultTag::Signing => "ecdsa_key",
        }
    }
}

impl fmt::Display for VaultTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

struct Inner {
    store: Arc<dyn SecretStore>,
    cipher: SymmetricCipher,
    kdf: PasswordKdf,
    iterations: u32,
    prefix: String,
}

/// Password-gated key storage over a [`SecretStore`].
#[derive(Clone)]
pub struct KeyVault {
    inner: Arc<Inner>,
    locks: Arc<DashMap<(String, String), Arc<Mutex<()>>>>,
}

impl fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVault")
            .field("cipher", &self.inner.cipher)
            .field("kdf", &self.inner.kdf)
            .field("prefix", &self.inner.prefix)
            .finish_non_exhaustive()
    }
}

impl KeyVault {
    pub fn new(store: Arc<dyn SecretStore>, config: &CryptoConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                cipher: SymmetricCipher::from_config(config),
                kdf: config.password_kdf,
                iterations: config.kdf_iterations,
                prefix: config.service_prefix.clone(),
            }),
            locks: Arc::new(DashMap::new()),
        }
    }

    /// A vault backed by the OS keychain.
    pub fn with_keyring(config: &CryptoConfig) -> Self {
        Self::new(Arc::new(KeyringSecretStore::new()), config)
    }

    /// Secret-store service name for `tag`, e.g. `apata_messenger_ecdh_key`.
    pub fn service_tag(&self, tag: VaultTag) -> String {
        self.inner.service_tag(tag)
    }

    async fn lock(&self, tag: VaultTag, owner: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry((self.service_tag(tag), owner.to_owned()))
            .or_default()
            .clone();
        mutex.lock_owned().await
    }

    /// Stretch `password` with the configured KDF. A random salt is drawn when
    /// none is supplied, and `iterations` falls back to the configured count.
    pub async fn derive_key_from_password(
        &self,
        password: &str,
        salt: Option<&[u8]>,
        iterations: Option<u32>,
    ) -> Result<PasswordKey, CryptoError> {
        let salt = salt.map_or_else(|| kdf::generate_salt().to_vec(), <[u8]>::to_vec);
        let password = zeroize::Zeroizing::new(password.to_owned());
        let algorithm = self.inner.kdf;
        let iterations = iterations.unwrap_or(self.inner.iterations);
        offload(move || {
            let key = kdf::derive_key(algorithm, &password, &salt, iterations)?;
            Ok(PasswordKey { key, salt })
        })
        .await
    }

    /// True if a master key entry exists for `owner`.
    pub async fn is_registered(&self, owner: &str) -> Result<bool, CryptoError> {
        require_owner(owner)?;
        let inner = Arc::clone(&self.inner);
        let owner = owner.to_owned();
        offload(move || Ok(inner.read(VaultTag::Master, &owner)?.is_some())).await
    }

    /// Generate and store a master key wrapped under `password`.
    ///
    /// Returns `Ok(false)` without touching the store if `owner` already has
    /// a master key.
    pub async fn register_master_key(
        &self,
        owner: &str,
        password: &str,
    ) -> Result<bool, CryptoError> {
        require_owner(owner)?;
        require_password(password)?;
        let _guard = self.lock(VaultTag::Master, owner).await;

        let inner = Arc::clone(&self.inner);
        let owner_owned = owner.to_owned();
        let password = zeroize::Zeroizing::new(password.to_owned());
        let created = offload(move || {
            if inner.read(VaultTag::Master, &owner_owned)?.is_some() {
                return Ok(false);
            }
            let master = MasterKey::generate();
            let entry = inner.wrap_master(&master, &password)?;
            inner.write(VaultTag::Master, &owner_owned, &entry)?;
            Ok(true)
        })
        .await?;

        if created {
            tracing::info!(owner = %owner, "master key registered");
        } else {
            tracing::warn!(owner = %owner, "master key already registered");
        }
        Ok(created)
    }

    /// Unwrap the master key with `password`.
    ///
    /// `NotFound` if no entry exists, `AuthenticationFailed` for a wrong
    /// password or a corrupted entry.
    pub async fn get_master_key(
        &self,
        owner: &str,
        password: &str,
    ) -> Result<MasterKey, CryptoError> {
        require_owner(owner)?;
        require_password(password)?;
        let inner = Arc::clone(&self.inner);
        let owner_owned = owner.to_owned();
        let password = zeroize::Zeroizing::new(password.to_owned());
        offload(move || inner.unwrap_master(&owner_owned, &password))
            .await
            .inspect_err(|e| log_read_failure(owner, VaultTag::Master, e))
    }

    /// Re-wrap the master key under `new_password` with a fresh salt.
    /// Private key entries are untouched.
    pub async fn change_password(
        &self,
        owner: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), CryptoError> {
        require_owner(owner)?;
        require_password(old_password)?;
        require_password(new_password)?;
        let _guard = self.lock(VaultTag::Master, owner).await;

        let inner = Arc::clone(&self.inner);
        let owner_owned = owner.to_owned();
        let old = zeroize::Zeroizing::new(old_password.to_owned());
        let new = zeroize::Zeroizing::new(new_password.to_owned());
        offload(move || {
            let master = inner.unwrap_master(&owner_owned, &old)?;
            let entry = inner.wrap_master(&master, &new)?;
            inner.write(VaultTag::Master, &owner_owned, &entry)
        })
        .await?;

        tracing::info!(owner = %owner, "vault password changed");
        Ok(())
    }

    /// Wrap `key_material` under the master key unlocked by `password`.
    pub async fn store_private_key(
        &self,
        owner: &str,
        tag: VaultTag,
        key_material: &PrivateKeyPem,
        password: &str,
    ) -> Result<(), CryptoError> {
        require_owner(owner)?;
        require_private_tag(tag)?;
        require_password(password)?;
        let master = self.get_master_key(owner, password).await?;
        self.store_with_master(owner, tag, key_material, &master).await
    }

    /// Wrap `key_material` under an already unlocked master key.
    pub async fn store_with_master(
        &self,
        owner: &str,
        tag: VaultTag,
        key_material: &PrivateKeyPem,
        master: &MasterKey,
    ) -> Result<(), CryptoError> {
        require_owner(owner)?;
        require_private_tag(tag)?;
        if key_material.as_str().is_empty() {
            return Err(CryptoError::InvalidInput("key material cannot be empty".into()));
        }
        let _guard = self.lock(tag, owner).await;

        let inner = Arc::clone(&self.inner);
        let owner_owned = owner.to_owned();
        let material = key_material.clone();
        let master = master.clone();
        offload(move || {
            let entry = inner.wrap_private(&material, &master)?;
            inner.write(tag, &owner_owned, &entry)
        })
        .await?;

        tracing::info!(owner = %owner, tag = %tag, "private key stored");
        Ok(())
    }

    pub async fn get_private_key(
        &self,
        owner: &str,
        tag: VaultTag,
        password: &str,
    ) -> Result<PrivateKeyPem, CryptoError> {
        require_owner(owner)?;
        require_private_tag(tag)?;
        let master = self.get_master_key(owner, password).await?;
        self.get_with_master(owner, tag, &master).await
    }

    pub async fn get_with_master(
        &self,
        owner: &str,
        tag: VaultTag,
        master: &MasterKey,
    ) -> Result<PrivateKeyPem, CryptoError> {
        require_owner(owner)?;
        require_private_tag(tag)?;
        let inner = Arc::clone(&self.inner);
        let owner_owned = owner.to_owned();
        let master = master.clone();
        offload(move || inner.unwrap_private(&owner_owned, tag, &master))
            .await
            .inspect_err(|e| log_read_failure(owner, tag, e))
    }

    /// Delete one entry. Returns whether it existed.
    pub async fn clear(&self, owner: &str, tag: VaultTag) -> Result<bool, CryptoError> {
        require_owner(owner)?;
        let _guard = self.lock(tag, owner).await;
        let inner = Arc::clone(&self.inner);
        let owner_owned = owner.to_owned();
        let removed = offload(move || {
            let service = inner.service_tag(tag);
            inner.store.delete(&service, &owner_owned)
        })
        .await?;
        tracing::info!(owner = %owner, tag = %tag, removed, "vault entry cleared");
        Ok(removed)
    }

    /// Delete every entry for `owner`.
    ///
    /// Keeps going when one deletion fails and returns the first error once
    /// all tags were attempted.
    pub async fn clear_all(&self, owner: &str) -> Result<(), CryptoError> {
        let mut first_error = None;
        for tag in VaultTag::ALL {
            if let Err(e) = self.clear(owner, tag).await {
                tracing::warn!(owner = %owner, tag = %tag, error = %e, "failed to clear vault entry");
                first_error.get_or_insert(e);
            }
        }
        self.prune_locks(owner);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop the lock entries for `owner` that no task holds or waits on.
    fn prune_locks(&self, owner: &str) {
        for tag in VaultTag::ALL {
            self.locks
                .remove_if(&(self.service_tag(tag), owner.to_owned()), |_, mutex| {
                    Arc::strong_count(mutex) == 1
                });
        }
    }
}

impl Inner {
    fn service_tag(&self, tag: VaultTag) -> String {
        format!("{}_{}", self.prefix, tag.suffix())
    }

    fn read(&self, tag: VaultTag, owner: &str) -> Result<Option<String>, CryptoError> {
        let entry = self.store.get(&self.service_tag(tag), owner)?;
        Ok(entry.filter(|e| !e.is_empty()))
    }

    fn read_required(&self, tag: VaultTag, owner: &str) -> Result<Vec<u8>, CryptoError> {
        let entry = self.read(tag, owner)?.ok_or_else(|| CryptoError::NotFound {
            owner: owner.to_owned(),
            tag: tag.to_string(),
        })?;
        Ok(base64::engine::general_purpose::STANDARD.decode(entry)?)
    }

    fn write(&self, tag: VaultTag, owner: &str, entry: &str) -> Result<(), CryptoError> {
        self.store.set(&self.service_tag(tag), owner, entry)
    }

    fn wrap_master(&self, master: &MasterKey, password: &str) -> Result<String, CryptoError> {
        let salt = kdf::generate_salt();
        let key = kdf::derive_key(self.kdf, password, &salt, self.iterations)?;
        let sealed = self.cipher.seal(master.as_bytes(), key.as_ref())?;

        let mut data = Vec::with_capacity(MIN_MASTER_ENTRY_LEN + master.as_bytes().len());
        data.extend_from_slice(&salt);
        data.extend_from_slice(&sealed.to_vault_bytes());
        Ok(base64::engine::general_purpose::STANDARD.encode(data))
    }

    fn unwrap_master(&self, owner: &str, password: &str) -> Result<MasterKey, CryptoError> {
        let data = self.read_required(VaultTag::Master, owner)?;
        if data.len() < MIN_MASTER_ENTRY_LEN {
            return Err(CryptoError::InvalidCiphertext(format!(
                "master key entry too short: {} bytes",
                data.len()
            )));
        }
        let (salt, rest) = data.split_at(SALT_LEN);
        let key = kdf::derive_key(self.kdf, password, salt, self.iterations)?;
        let sealed = Sealed::from_vault_bytes(rest)?;
        let plaintext = self.cipher.open(&sealed, key.as_ref())?;
        MasterKey::from_slice(&plaintext)
    }

    fn wrap_private(
        &self,
        material: &PrivateKeyPem,
        master: &MasterKey,
    ) -> Result<String, CryptoError> {
        let sealed = self.cipher.seal(material.as_str().as_bytes(), master.as_bytes())?;
        Ok(base64::engine::general_purpose::STANDARD.encode(sealed.to_vault_bytes()))
    }

    fn unwrap_private(
        &self,
        owner: &str,
        tag: VaultTag,
        master: &MasterKey,
    ) -> Result<PrivateKeyPem, CryptoError> {
        let data = self.read_required(tag, owner)?;
        let sealed = Sealed::from_vault_bytes(&data)?;
        let plaintext = self.cipher.open(&sealed, master.as_bytes())?;
        let pem = std::str::from_utf8(&plaintext)
            .map_err(|_| CryptoError::InvalidCiphertext("stored key is not valid UTF-8".into()))?;
        Ok(PrivateKeyPem::new(pem))
    }
}

fn require_owner(owner: &str) -> Result<(), CryptoError> {
    if owner.is_empty() {
        return Err(CryptoError::InvalidInput("owner cannot be empty".into()));
    }
    Ok(())
}

fn require_password(password: &str) -> Result<(), CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::InvalidInput("password cannot be empty".into()));
    }
    Ok(())
}

fn require_private_tag(tag: VaultTag) -> Result<(), CryptoError> {
    if tag == VaultTag::Master {
        return Err(CryptoError::InvalidInput(
            "the master key entry is managed by register_master_key".into(),
        ));
    }
    Ok(())
}

fn log_read_failure(owner: &str, tag: VaultTag, err: &CryptoError) {
    match err {
        CryptoError::AuthenticationFailed => {
            tracing::warn!(owner = %owner, tag = %tag, "vault entry failed authentication")
        }
        CryptoError::NotFound { .. } => {
            tracing::debug!(owner = %owner, tag = %tag, "vault entry not found")
        }
        other => tracing::error!(owner = %owner, tag = %tag, error = %other, "vault read failed"),
    }
}
