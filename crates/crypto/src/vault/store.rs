//! Key-value secret storage keyed by `(service, account)`.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::error::CryptoError;

/// Platform credential storage. Calls may block and are made from the
/// blocking pool.
pub trait SecretStore: Send + Sync + 'static {
    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), CryptoError>;
    /// `Ok(None)` when no entry exists.
    fn get(&self, service: &str, account: &str) -> Result<Option<String>, CryptoError>;
    /// Returns whether an entry was removed.
    fn delete(&self, service: &str, account: &str) -> Result<bool, CryptoError>;
}

/// Secret store backed by the OS keychain via `keyring`.
#[derive(Debug, Default)]
pub struct KeyringSecretStore;

impl KeyringSecretStore {
    pub fn new() -> Self {
        Self
    }
}

impl SecretStore for KeyringSecretStore {
    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), CryptoError> {
        let entry = keyring::Entry::new(service, account)?;
        entry.set_password(secret)?;
        Ok(())
    }

    fn get(&self, service: &str, account: &str) -> Result<Option<String>, CryptoError> {
        let entry = keyring::Entry::new(service, account)?;
        match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, service: &str, account: &str) -> Result<bool, CryptoError> {
        let entry = keyring::Entry::new(service, account)?;
        match entry.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process secret store for tests and headless tooling.
///
/// `set_available(false)` makes every call fail with `VaultUnavailable`.
#[derive(Debug)]
pub struct MemorySecretStore {
    entries: DashMap<(String, String), String>,
    available: AtomicBool,
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check(&self) -> Result<(), CryptoError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CryptoError::VaultUnavailable("memory store disabled".into()))
        }
    }
}

impl SecretStore for MemorySecretStore {
    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), CryptoError> {
        self.check()?;
        self.entries
            .insert((service.to_owned(), account.to_owned()), secret.to_owned());
        Ok(())
    }

    fn get(&self, service: &str, account: &str) -> Result<Option<String>, CryptoError> {
        self.check()?;
        Ok(self
            .entries
            .get(&(service.to_owned(), account.to_owned()))
            .map(|v| v.value().clone()))
    }

    fn delete(&self, service: &str, account: &str) -> Result<bool, CryptoError> {
        self.check()?;
        Ok(self
            .entries
            .remove(&(service.to_owned(), account.to_owned()))
            .is_some())
    }
}
