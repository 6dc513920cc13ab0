//! Sending and receiving encrypted messages over a transport.
//!
//! Outbound messages always use a freshly fetched directory record. Inbound
//! messages never fail the session: each one comes back with a
//! [`DeliveryStatus`] the caller can show next to it.

use std::sync::Arc;

use apata_shared::api::message::{IncomingMessage, SendMessageRequest, SendMessageResponse};
use apata_shared::constants::{MAX_CONTENT_TYPE_LENGTH, MAX_MESSAGE_SIZE_BYTES};
use apata_shared::ids::{MessageId, UserId};
use chrono::{DateTime, Utc};

use crate::agreement::KeyAgreementEngine;
use crate::cipher::SymmetricCipher;
use crate::directory::Directory;
use crate::error::CryptoError;
use crate::identity::SessionContext;
use crate::protocol::{
    AgreementProvider, CipherProvider, EncryptedEnvelope, EncryptionProtocol, SignatureProvider,
};
use crate::signature::SignatureEngine;

#[async_trait::async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, request: SendMessageRequest) -> Result<SendMessageResponse, CryptoError>;
}

/// A known peer and the signing key pinned for them when they were added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub user_id: UserId,
    pub username: String,
    pub signing_public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Decrypted(String),
    /// The sender's key binding did not verify or could not be checked.
    Untrusted(String),
    /// The binding held but the ciphertext would not open.
    Undecryptable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub content_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: DeliveryStatus,
}

pub struct MessageService<D, T, S = SignatureEngine, K = KeyAgreementEngine, C = SymmetricCipher> {
    protocol: EncryptionProtocol<S, K, C>,
    directory: Arc<D>,
    transport: Arc<T>,
}

impl<D, T, S, K, C> MessageService<D, T, S, K, C>
where
    D: Directory,
    T: MessageTransport,
    S: SignatureProvider,
    K: AgreementProvider,
    C: CipherProvider,
{
    pub fn new(protocol: EncryptionProtocol<S, K, C>, directory: Arc<D>, transport: Arc<T>) -> Self {
        Self {
            protocol,
            directory,
            transport,
        }
    }

    /// Encrypt `plaintext` for `contact` and hand it to the transport.
    ///
    /// The recipient's record is fetched on every call. A directory signing
    /// key that differs from the one pinned on `contact` is a
    /// `SecurityError`, and nothing is sent.
    pub async fn send_message(
        &self,
        ctx: &SessionContext,
        contact: &Contact,
        plaintext: &str,
        content_type: Option<String>,
    ) -> Result<SendMessageResponse, CryptoError> {
        validate_outbound(plaintext, content_type.as_deref())?;
        let sender = ctx.sender_keys()?;

        let record = self
            .directory
            .get_public_keys(contact.user_id)
            .await
            .inspect_err(|e| {
                tracing::warn!(recipient_id = %contact.user_id, error = %e, "directory lookup failed");
            })?;

        if record.signing_public_key.trim() != contact.signing_public_key.trim() {
            tracing::error!(recipient_id = %contact.user_id, "directory signing key differs from pinned key");
            return Err(CryptoError::SecurityError(format!(
                "signing key for {} changed since it was pinned",
                contact.username
            )));
        }

        let envelope = self
            .protocol
            .encrypt_message(&sender, &record, plaintext, content_type)
            .await?;
        let response = self
            .transport
            .send(envelope.into_send_request(contact.user_id))
            .await?;

        tracing::debug!(recipient_id = %contact.user_id, message_id = %response.id, "message sent");
        Ok(response)
    }

    /// Decrypt one delivered message from a sender whose signing key is
    /// `sender_signing_public_key`.
    ///
    /// Anything wrong with the message itself becomes a status. Only a
    /// missing local agreement key or a worker fault is an error.
    pub async fn receive_message(
        &self,
        ctx: &SessionContext,
        incoming: &IncomingMessage,
        sender_signing_public_key: &str,
    ) -> Result<ReceivedMessage, CryptoError> {
        let own = &ctx.agreement()?.private;
        let envelope = EncryptedEnvelope::from(incoming);
        let status = match self
            .protocol
            .decrypt_message(own, sender_signing_public_key, &envelope)
            .await
        {
            Ok(plaintext) => DeliveryStatus::Decrypted(plaintext),
            Err(CryptoError::SecurityError(reason)) => {
                tracing::error!(message_id = %incoming.id, sender_id = %incoming.sender_id, "untrusted message");
                DeliveryStatus::Untrusted(reason)
            }
            Err(CryptoError::MalformedSignature(reason)) => {
                tracing::error!(message_id = %incoming.id, sender_id = %incoming.sender_id, "malformed sender signature");
                DeliveryStatus::Untrusted(reason)
            }
            // A binding that cannot be checked counts as a failed one.
            Err(e @ (CryptoError::InvalidInput(_) | CryptoError::InvalidKey(_))) => {
                tracing::error!(message_id = %incoming.id, sender_id = %incoming.sender_id, error = %e, "unverifiable message");
                DeliveryStatus::Untrusted(e.to_string())
            }
            Err(CryptoError::AuthenticationFailed) | Err(CryptoError::InvalidCiphertext(_)) => {
                tracing::warn!(message_id = %incoming.id, sender_id = %incoming.sender_id, "undecryptable message");
                DeliveryStatus::Undecryptable
            }
            Err(e) => return Err(e),
        };
        Ok(received(incoming, status))
    }

    /// Process a backlog of undelivered messages in order.
    ///
    /// `lookup` resolves a sender to their pinned signing key. A sender with
    /// no pinned key yields `Untrusted`. One bad message never discards the
    /// rest of the batch.
    pub async fn receive_batch<F>(
        &self,
        ctx: &SessionContext,
        messages: &[IncomingMessage],
        lookup: F,
    ) -> Result<Vec<ReceivedMessage>, CryptoError>
    where
        F: Fn(UserId) -> Option<String>,
    {
        ctx.agreement()?;
        let mut out = Vec::with_capacity(messages.len());
        for incoming in messages {
            let message = match lookup(incoming.sender_id) {
                Some(key) => self.receive_message(ctx, incoming, &key).await?,
                None => {
                    tracing::warn!(sender_id = %incoming.sender_id, "no pinned signing key for sender");
                    received(
                        incoming,
                        DeliveryStatus::Untrusted("sender signing key unknown".into()),
                    )
                }
            };
            out.push(message);
        }
        Ok(out)
    }
}

fn received(incoming: &IncomingMessage, status: DeliveryStatus) -> ReceivedMessage {
    ReceivedMessage {
        id: incoming.id,
        sender_id: incoming.sender_id,
        content_type: incoming.content_type.clone(),
        timestamp: incoming.timestamp,
        status,
    }
}

fn validate_outbound(plaintext: &str, content_type: Option<&str>) -> Result<(), CryptoError> {
    if plaintext.is_empty() {
        return Err(CryptoError::InvalidInput("message cannot be empty".into()));
    }
    if plaintext.len() > MAX_MESSAGE_SIZE_BYTES {
        return Err(CryptoError::InvalidInput(format!(
            "message exceeds {MAX_MESSAGE_SIZE_BYTES} bytes"
        )));
    }
    if content_type.is_some_and(|c| c.len() > MAX_CONTENT_TYPE_LENGTH) {
        return Err(CryptoError::InvalidInput(format!(
            "content type exceeds {MAX_CONTENT_TYPE_LENGTH} characters"
        )));
    }
    Ok(())
}
