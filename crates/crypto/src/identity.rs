//! Identity registration, login and logout.
//!
//! Registration mints the long-term signing keypair and a first agreement
//! keypair and stores both under a fresh master key. Login unwraps them into
//! a [`SessionContext`] that the caller owns and passes to every protocol
//! call; dropping the context wipes the key material.

use apata_shared::api::keys::{PublicKeysResponse, RegisterKeysRequest};

use crate::error::CryptoError;
use crate::keys::{AgreementKeyPair, PrivateKeyPem};
use crate::protocol::{
    AgreementProvider, CipherProvider, EncryptionProtocol, SenderKeys, SignatureProvider,
};
use crate::vault::{KeyVault, MasterKey, VaultTag};

/// Key material for one logged-in principal.
pub struct SessionContext {
    owner: String,
    signing_private_key: PrivateKeyPem,
    signing_public_key: String,
    agreement: Option<AgreementKeyPair>,
    master_key: MasterKey,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("owner", &self.owner)
            .field("signing_public_key", &self.signing_public_key)
            .field("has_agreement_key", &self.agreement.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn signing_private_key(&self) -> &PrivateKeyPem {
        &self.signing_private_key
    }

    pub fn signing_public_key(&self) -> &str {
        &self.signing_public_key
    }

    pub fn master_key(&self) -> &MasterKey {
        &self.master_key
    }

    /// The active agreement keypair.
    ///
    /// `NotFound` if login found no stored agreement key; rotate to mint one.
    pub fn agreement(&self) -> Result<&AgreementKeyPair, CryptoError> {
        self.agreement.as_ref().ok_or_else(|| CryptoError::NotFound {
            owner: self.owner.clone(),
            tag: VaultTag::Agreement.to_string(),
        })
    }

    /// True when there is no agreement key to encrypt or decrypt with.
    pub fn needs_rotation(&self) -> bool {
        self.agreement.is_none()
    }

    pub fn sender_keys(&self) -> Result<SenderKeys, CryptoError> {
        Ok(SenderKeys {
            signing_private_key: self.signing_private_key.clone(),
            agreement: self.agreement()?.clone(),
        })
    }

    /// Swap in a new agreement keypair, returning the previous one.
    pub(crate) fn replace_agreement(&mut self, pair: AgreementKeyPair) -> Option<AgreementKeyPair> {
        self.agreement.replace(pair)
    }
}

/// Result of [`register_identity`]: the public record to publish and a
/// ready session.
#[derive(Debug)]
pub struct RegisteredIdentity {
    pub record: PublicKeysResponse,
    pub session: SessionContext,
}

impl RegisteredIdentity {
    pub fn register_request(&self) -> RegisterKeysRequest {
        RegisterKeysRequest {
            username: self.session.owner.clone(),
            signing_public_key: self.record.signing_public_key.clone(),
            agreement_public_key: self.record.agreement_public_key.clone(),
            agreement_key_signature: self.record.agreement_key_signature.clone(),
        }
    }
}

/// Create a new identity for `owner` and store its keys in `vault`.
///
/// Fails with `InvalidInput` if `owner` already has a master key. If storing
/// a private key fails, every entry written so far is removed again.
pub async fn register_identity<S, K, C>(
    vault: &KeyVault,
    protocol: &EncryptionProtocol<S, K, C>,
    owner: &str,
    password: &str,
) -> Result<RegisteredIdentity, CryptoError>
where
    S: SignatureProvider,
    K: AgreementProvider,
    C: CipherProvider,
{
    tracing::debug!(owner = %owner, "registering identity");
    if vault.is_registered(owner).await? {
        return Err(CryptoError::InvalidInput(format!(
            "identity already registered for {owner}"
        )));
    }

    let keys = protocol.generate_key_pairs().await?;
    let agreement_key_signature = protocol
        .sign_string(&keys.signing.private, &keys.agreement.public)
        .await?;

    if !vault.register_master_key(owner, password).await? {
        return Err(CryptoError::InvalidInput(format!(
            "identity already registered for {owner}"
        )));
    }

    let stored = async {
        let master_key = vault.get_master_key(owner, password).await?;
        vault
            .store_with_master(owner, VaultTag::Signing, &keys.signing.private, &master_key)
            .await?;
        vault
            .store_with_master(owner, VaultTag::Agreement, &keys.agreement.private, &master_key)
            .await?;
        Ok::<_, CryptoError>(master_key)
    }
    .await;

    let master_key = match stored {
        Ok(master_key) => master_key,
        Err(e) => {
            tracing::error!(owner = %owner, error = %e, "registration failed, removing partial identity");
            if let Err(cleanup) = vault.clear_all(owner).await {
                tracing::warn!(owner = %owner, error = %cleanup, "cleanup after failed registration");
            }
            return Err(e);
        }
    };

    tracing::info!(owner = %owner, "identity registered");
    Ok(RegisteredIdentity {
        record: PublicKeysResponse {
            signing_public_key: keys.signing.public.clone(),
            agreement_public_key: keys.agreement.public.clone(),
            agreement_key_signature,
        },
        session: SessionContext {
            owner: owner.to_owned(),
            signing_private_key: keys.signing.private.clone(),
            signing_public_key: keys.signing.public.clone(),
            agreement: Some(keys.agreement.clone()),
            master_key,
        },
    })
}

/// Unlock `owner`'s keys with `password`.
///
/// `AuthenticationFailed` for a wrong password, `NotFound` when the owner
/// has no master key or signing key. A missing agreement key is not an
/// error: the context reports [`needs_rotation`](SessionContext::needs_rotation).
pub async fn login<S, K, C>(
    vault: &KeyVault,
    protocol: &EncryptionProtocol<S, K, C>,
    owner: &str,
    password: &str,
) -> Result<SessionContext, CryptoError>
where
    S: SignatureProvider,
    K: AgreementProvider,
    C: CipherProvider,
{
    tracing::debug!(owner = %owner, "logging in");
    let master_key = vault.get_master_key(owner, password).await?;
    let signing_private_key = vault
        .get_with_master(owner, VaultTag::Signing, &master_key)
        .await?;
    let signing_public_key = protocol.signing_public_key(&signing_private_key).await?;

    let agreement = match vault
        .get_with_master(owner, VaultTag::Agreement, &master_key)
        .await
    {
        Ok(private) => {
            let public = protocol.agreement_public_key(&private).await?;
            Some(AgreementKeyPair { private, public })
        }
        Err(CryptoError::NotFound { .. }) => {
            tracing::warn!(owner = %owner, "no agreement key stored, rotation required");
            None
        }
        Err(e) => return Err(e),
    };

    tracing::info!(owner = %owner, "logged in");
    Ok(SessionContext {
        owner: owner.to_owned(),
        signing_private_key,
        signing_public_key,
        agreement,
        master_key,
    })
}

/// End a session. Key material in `ctx` is wiped as it drops.
pub fn logout(ctx: SessionContext) {
    tracing::info!(owner = %ctx.owner, "logged out");
}

/// End a session and delete every vault entry for its owner.
pub async fn logout_and_forget(vault: &KeyVault, ctx: SessionContext) -> Result<(), CryptoError> {
    let owner = ctx.owner.clone();
    logout(ctx);
    vault.clear_all(&owner).await?;
    tracing::info!(owner = %owner, "identity removed from vault");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::CryptoConfig;
    use crate::vault::{MemorySecretStore, SecretStore};

    fn setup() -> (KeyVault, EncryptionProtocol, Arc<MemorySecretStore>) {
        let config = CryptoConfig {
            kdf_iterations: 1_000,
            ..CryptoConfig::default()
        };
        let store = Arc::new(MemorySecretStore::new());
        (
            KeyVault::new(store.clone(), &config),
            EncryptionProtocol::from_config(&config),
            store,
        )
    }

    #[tokio::test]
    async fn test_register_then_login_restores_same_keys() {
        let (vault, protocol, _) = setup();
        let registered = register_identity(&vault, &protocol, "alice", "pw").await.unwrap();

        let record = &registered.record;
        assert!(protocol
            .verify_signature(
                &record.signing_public_key,
                &record.agreement_public_key,
                &record.agreement_key_signature,
            )
            .await
            .unwrap());

        let ctx = login(&vault, &protocol, "alice", "pw").await.unwrap();
        assert_eq!(ctx.owner(), "alice");
        assert_eq!(ctx.signing_public_key(), record.signing_public_key);
        assert_eq!(ctx.agreement().unwrap().public, record.agreement_public_key);
        assert_eq!(
            ctx.master_key().as_bytes(),
            registered.session.master_key().as_bytes()
        );
        assert!(!ctx.needs_rotation());
    }

    #[tokio::test]
    async fn test_register_twice_is_rejected() {
        let (vault, protocol, _) = setup();
        register_identity(&vault, &protocol, "alice", "pw").await.unwrap();
        let result = register_identity(&vault, &protocol, "alice", "pw").await;
        assert!(matches!(result, Err(CryptoError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_register_request_carries_public_record() {
        let (vault, protocol, _) = setup();
        let registered = register_identity(&vault, &protocol, "alice", "pw").await.unwrap();
        let request = registered.register_request();
        assert_eq!(request.username, "alice");
        assert_eq!(request.signing_public_key, registered.record.signing_public_key);
        assert_eq!(request.agreement_key_signature, registered.record.agreement_key_signature);
    }

    #[tokio::test]
    async fn test_login_with_wrong_password_fails_authentication() {
        let (vault, protocol, _) = setup();
        register_identity(&vault, &protocol, "alice", "pw").await.unwrap();
        let result = login(&vault, &protocol, "alice", "bad").await;
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[tokio::test]
    async fn test_login_unknown_owner_is_not_found() {
        let (vault, protocol, _) = setup();
        let result = login(&vault, &protocol, "ghost", "pw").await;
        assert!(matches!(result, Err(CryptoError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_login_without_agreement_key_needs_rotation() {
        let (vault, protocol, _) = setup();
        register_identity(&vault, &protocol, "alice", "pw").await.unwrap();
        vault.clear("alice", VaultTag::Agreement).await.unwrap();

        let ctx = login(&vault, &protocol, "alice", "pw").await.unwrap();
        assert!(ctx.needs_rotation());
        assert!(matches!(ctx.agreement(), Err(CryptoError::NotFound { .. })));
        assert!(ctx.sender_keys().is_err());
    }

    #[tokio::test]
    async fn test_logout_and_forget_clears_vault() {
        let (vault, protocol, store) = setup();
        let registered = register_identity(&vault, &protocol, "alice", "pw").await.unwrap();
        assert_eq!(store.len(), 3);

        logout_and_forget(&vault, registered.session).await.unwrap();
        assert!(store.is_empty());
        assert!(!vault.is_registered("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_logout_keeps_vault_entries() {
        let (vault, protocol, store) = setup();
        let registered = register_identity(&vault, &protocol, "alice", "pw").await.unwrap();
        logout(registered.session);
        assert_eq!(store.len(), 3);
        assert!(login(&vault, &protocol, "alice", "pw").await.is_ok());
    }

    #[tokio::test]
    async fn test_context_debug_hides_key_material() {
        let (vault, protocol, _) = setup();
        let registered = register_identity(&vault, &protocol, "alice", "pw").await.unwrap();
        let debug = format!("{:?}", registered.session);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn test_unavailable_store_during_registration_is_retryable() {
        let (vault, protocol, store) = setup();
        store.set_available(false);
        let err = register_identity(&vault, &protocol, "alice", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::VaultUnavailable(_)));
        store.set_available(true);
        assert!(store.get("apata_messenger_master_key", "alice").unwrap().is_none());
    }

    /// Rejects writes to one service, passing everything else through.
    struct RejectingStore {
        inner: MemorySecretStore,
        rejected_service: &'static str,
    }

    impl SecretStore for RejectingStore {
        fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), CryptoError> {
            if service == self.rejected_service {
                return Err(CryptoError::Storage("write rejected".into()));
            }
            self.inner.set(service, account, secret)
        }
        fn get(&self, service: &str, account: &str) -> Result<Option<String>, CryptoError> {
            self.inner.get(service, account)
        }
        fn delete(&self, service: &str, account: &str) -> Result<bool, CryptoError> {
            self.inner.delete(service, account)
        }
    }

    #[tokio::test]
    async fn test_failed_registration_leaves_no_partial_identity() {
        let config = CryptoConfig {
            kdf_iterations: 1_000,
            ..CryptoConfig::default()
        };
        let store = Arc::new(RejectingStore {
            inner: MemorySecretStore::new(),
            rejected_service: "apata_messenger_ecdh_key",
        });
        let vault = KeyVault::new(store.clone(), &config);
        let protocol = EncryptionProtocol::from_config(&config);

        let result = register_identity(&vault, &protocol, "alice", "pw").await;
        assert!(matches!(result, Err(CryptoError::Storage(_))));
        assert!(store.inner.is_empty());
        assert!(!vault.is_registered("alice").await.unwrap());
    }
}
