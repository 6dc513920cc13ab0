//! Key directory collaborator.
//!
//! The directory maps a user to their signing public key and their current,
//! signed agreement public key. Nothing it returns is trusted until the
//! signature has been checked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use apata_shared::api::keys::{PublicKeysResponse, UpdateAgreementKeyRequest};
use apata_shared::ids::UserId;
use dashmap::DashMap;

use crate::error::CryptoError;

/// A principal's directory entry.
pub type DirectoryRecord = PublicKeysResponse;

#[async_trait::async_trait]
pub trait Directory: Send + Sync {
    /// Fetch the current record for `user_id`.
    async fn get_public_keys(&self, user_id: UserId) -> Result<DirectoryRecord, CryptoError>;

    /// Announce a rotated agreement key for the authenticated user.
    async fn publish_agreement_key(
        &self,
        request: UpdateAgreementKeyRequest,
    ) -> Result<(), CryptoError>;
}

/// In-process directory for tests and local tooling.
///
/// Handles returned by [`as_user`](Self::as_user) share the same records and
/// publish on behalf of that user.
#[derive(Clone)]
pub struct InMemoryDirectory {
    records: Arc<DashMap<UserId, DirectoryRecord>>,
    available: Arc<AtomicBool>,
    current_user: Option<UserId>,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            available: Arc::new(AtomicBool::new(true)),
            current_user: None,
        }
    }

    /// A handle that publishes as `user_id`.
    pub fn as_user(&self, user_id: UserId) -> Self {
        Self {
            records: Arc::clone(&self.records),
            available: Arc::clone(&self.available),
            current_user: Some(user_id),
        }
    }

    pub fn insert(&self, user_id: UserId, record: DirectoryRecord) {
        self.records.insert(user_id, record);
    }

    pub fn record(&self, user_id: UserId) -> Option<DirectoryRecord> {
        self.records.get(&user_id).map(|r| r.value().clone())
    }

    /// While unavailable every call fails with `Directory`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CryptoError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CryptoError::Directory("directory unavailable".into()))
        }
    }
}

#[async_trait::async_trait]
impl Directory for InMemoryDirectory {
    async fn get_public_keys(&self, user_id: UserId) -> Result<DirectoryRecord, CryptoError> {
        self.check()?;
        self.record(user_id)
            .ok_or_else(|| CryptoError::Directory(format!("no public keys for user {user_id}")))
    }

    async fn publish_agreement_key(
        &self,
        request: UpdateAgreementKeyRequest,
    ) -> Result<(), CryptoError> {
        self.check()?;
        let user_id = self
            .current_user
            .ok_or_else(|| CryptoError::Directory("not authenticated".into()))?;
        let mut record = self
            .records
            .get_mut(&user_id)
            .ok_or_else(|| CryptoError::Directory(format!("user {user_id} is not registered")))?;
        record.agreement_public_key = request.agreement_public_key;
        record.agreement_key_signature = request.agreement_key_signature;
        tracing::debug!(user_id = %user_id, "agreement key published");
        Ok(())
    }
}
