//! Agreement key rotation.

use std::sync::Arc;

use apata_shared::api::keys::UpdateAgreementKeyRequest;

use crate::agreement::KeyAgreementEngine;
use crate::cipher::SymmetricCipher;
use crate::directory::Directory;
use crate::error::CryptoError;
use crate::identity::SessionContext;
use crate::keys::AgreementKeyPair;
use crate::protocol::{AgreementProvider, CipherProvider, EncryptionProtocol, SignatureProvider};
use crate::signature::SignatureEngine;
use crate::vault::{KeyVault, VaultTag};

/// Rotates a session's agreement keypair and announces it.
pub struct SessionKeyManager<D, S = SignatureEngine, K = KeyAgreementEngine, C = SymmetricCipher> {
    protocol: EncryptionProtocol<S, K, C>,
    vault: KeyVault,
    directory: Arc<D>,
}

impl<D, S, K, C> SessionKeyManager<D, S, K, C>
where
    D: Directory,
    S: SignatureProvider,
    K: AgreementProvider,
    C: CipherProvider,
{
    pub fn new(protocol: EncryptionProtocol<S, K, C>, vault: KeyVault, directory: Arc<D>) -> Self {
        Self {
            protocol,
            vault,
            directory,
        }
    }

    /// Replace the agreement keypair in `ctx` with a fresh one.
    ///
    /// Steps run in order: generate, sign with the signing key, publish to
    /// the directory, clear the old vault entry, store the new one, swap the
    /// in-memory key. `ctx` is only modified after every step succeeded; on
    /// any error the whole rotation must be retried.
    ///
    /// Messages encrypted to the previous public key can no longer be
    /// decrypted once this returns.
    pub async fn rotate_agreement_key(
        &self,
        ctx: &mut SessionContext,
    ) -> Result<AgreementKeyPair, CryptoError> {
        let owner = ctx.owner().to_owned();
        tracing::debug!(owner = %owner, "rotating agreement key");

        let pair = self.protocol.generate_agreement_keypair().await?;
        let signature = self
            .protocol
            .sign_string(ctx.signing_private_key(), &pair.public)
            .await?;

        self.directory
            .publish_agreement_key(UpdateAgreementKeyRequest {
                agreement_public_key: pair.public.clone(),
                agreement_key_signature: signature,
            })
            .await
            .inspect_err(|e| {
                tracing::warn!(owner = %owner, error = %e, "publishing rotated agreement key failed");
            })?;

        self.vault.clear(&owner, VaultTag::Agreement).await?;
        self.vault
            .store_with_master(&owner, VaultTag::Agreement, &pair.private, ctx.master_key())
            .await?;

        ctx.replace_agreement(pair.clone());
        tracing::info!(owner = %owner, "agreement key rotated");
        Ok(pair)
    }
}
