//! Message encryption protocol.
//!
//! Combines the signature, key-agreement and symmetric engines into the
//! outbound and inbound flows. Identity-binding signatures are always checked
//! before any key derivation or decryption happens, and a signature that does
//! not verify aborts the flow with `SecurityError`.

use std::sync::Arc;

use apata_shared::api::keys::PublicKeysResponse;
use apata_shared::api::message::{IncomingMessage, SendMessageRequest};
use apata_shared::ids::UserId;
use serde::{Deserialize, Serialize};

use crate::agreement::KeyAgreementEngine;
use crate::cipher::SymmetricCipher;
use crate::config::CryptoConfig;
use crate::error::CryptoError;
use crate::keys::{AgreementKeyPair, IdentityKeys, PrivateKeyPem, SharedKey, SigningKeyPair};
use crate::signature::SignatureEngine;
use crate::task::offload;

/// Signing operations the protocol depends on.
pub trait SignatureProvider: Send + Sync + 'static {
    fn generate_keypair(&self) -> Result<SigningKeyPair, CryptoError>;
    fn public_key(&self, private_key: &str) -> Result<String, CryptoError>;
    fn sign(&self, private_key: &str, message: &str) -> Result<String, CryptoError>;
    fn verify(&self, public_key: &str, message: &str, signature: &str)
        -> Result<bool, CryptoError>;
}

/// Key-agreement operations the protocol depends on.
pub trait AgreementProvider: Send + Sync + 'static {
    fn generate_keypair(&self) -> Result<AgreementKeyPair, CryptoError>;
    fn public_key(&self, private_key: &str) -> Result<String, CryptoError>;
    fn derive_shared_secret(
        &self,
        own_private: &str,
        peer_public: &str,
    ) -> Result<SharedKey, CryptoError>;
}

/// Symmetric operations the protocol depends on.
pub trait CipherProvider: Send + Sync + 'static {
    fn encrypt(&self, plaintext: &str, key: &[u8]) -> Result<String, CryptoError>;
    fn decrypt(&self, ciphertext: &str, key: &[u8]) -> Result<String, CryptoError>;
}

impl SignatureProvider for SignatureEngine {
    fn generate_keypair(&self) -> Result<SigningKeyPair, CryptoError> {
        SignatureEngine::generate_keypair(self)
    }
    fn public_key(&self, private_key: &str) -> Result<String, CryptoError> {
        SignatureEngine::public_key(self, private_key)
    }
    fn sign(&self, private_key: &str, message: &str) -> Result<String, CryptoError> {
        SignatureEngine::sign(self, private_key, message)
    }
    fn verify(
        &self,
        public_key: &str,
        message: &str,
        signature: &str,
    ) -> Result<bool, CryptoError> {
        SignatureEngine::verify(self, public_key, message, signature)
    }
}

impl AgreementProvider for KeyAgreementEngine {
    fn generate_keypair(&self) -> Result<AgreementKeyPair, CryptoError> {
        KeyAgreementEngine::generate_keypair(self)
    }
    fn public_key(&self, private_key: &str) -> Result<String, CryptoError> {
        KeyAgreementEngine::public_key(self, private_key)
    }
    fn derive_shared_secret(
        &self,
        own_private: &str,
        peer_public: &str,
    ) -> Result<SharedKey, CryptoError> {
        KeyAgreementEngine::derive_shared_secret(self, own_private, peer_public)
    }
}

impl CipherProvider for SymmetricCipher {
    fn encrypt(&self, plaintext: &str, key: &[u8]) -> Result<String, CryptoError> {
        SymmetricCipher::encrypt(self, plaintext, key)
    }
    fn decrypt(&self, ciphertext: &str, key: &[u8]) -> Result<String, CryptoError> {
        SymmetricCipher::decrypt(self, ciphertext, key)
    }
}

/// An encrypted message as it travels and as it is kept at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// base64(nonce ‖ ciphertext ‖ tag)
    pub ciphertext: String,
    /// Sender's current agreement public key (PEM).
    pub sender_ephemeral_agreement_public_key: String,
    /// Sender's signature over the agreement public key (base64).
    pub sender_ephemeral_signature: String,
    pub content_type: Option<String>,
}

impl EncryptedEnvelope {
    pub fn into_send_request(self, recipient_id: UserId) -> SendMessageRequest {
        SendMessageRequest {
            recipient_id,
            message: self.ciphertext,
            content_type: self.content_type,
            ephemeral_public_key: self.sender_ephemeral_agreement_public_key,
            ephemeral_signature: self.sender_ephemeral_signature,
        }
    }
}

impl From<&IncomingMessage> for EncryptedEnvelope {
    fn from(msg: &IncomingMessage) -> Self {
        Self {
            ciphertext: msg.message.clone(),
            sender_ephemeral_agreement_public_key: msg.ephemeral_public_key.clone(),
            sender_ephemeral_signature: msg.ephemeral_signature.clone(),
            content_type: msg.content_type.clone(),
        }
    }
}

/// Sender-side key material for one outbound message.
#[derive(Debug, Clone)]
pub struct SenderKeys {
    pub signing_private_key: PrivateKeyPem,
    pub agreement: AgreementKeyPair,
}

struct Engines<S, K, C> {
    signer: S,
    agreement: K,
    cipher: C,
}

/// Orchestrates the three engines. Cheap to clone; every operation runs on
/// the blocking pool.
pub struct EncryptionProtocol<
    S = SignatureEngine,
    K = KeyAgreementEngine,
    C = SymmetricCipher,
> {
    engines: Arc<Engines<S, K, C>>,
}

impl<S, K, C> Clone for EncryptionProtocol<S, K, C> {
    fn clone(&self) -> Self {
        Self {
            engines: Arc::clone(&self.engines),
        }
    }
}

impl EncryptionProtocol {
    pub fn from_config(config: &CryptoConfig) -> Self {
        Self::new(
            SignatureEngine::from_config(config),
            KeyAgreementEngine::from_config(config),
            SymmetricCipher::from_config(config),
        )
    }
}

impl Default for EncryptionProtocol {
    fn default() -> Self {
        Self::from_config(&CryptoConfig::default())
    }
}

impl<S, K, C> EncryptionProtocol<S, K, C>
where
    S: SignatureProvider,
    K: AgreementProvider,
    C: CipherProvider,
{
    pub fn new(signer: S, agreement: K, cipher: C) -> Self {
        Self {
            engines: Arc::new(Engines {
                signer,
                agreement,
                cipher,
            }),
        }
    }

    pub fn signer(&self) -> &S {
        &self.engines.signer
    }

    pub fn agreement(&self) -> &K {
        &self.engines.agreement
    }

    pub fn cipher(&self) -> &C {
        &self.engines.cipher
    }

    /// Mint a signing keypair and a first agreement keypair for registration.
    pub async fn generate_key_pairs(&self) -> Result<IdentityKeys, CryptoError> {
        let engines = Arc::clone(&self.engines);
        offload(move || {
            Ok(IdentityKeys {
                signing: engines.signer.generate_keypair()?,
                agreement: engines.agreement.generate_keypair()?,
            })
        })
        .await
    }

    pub async fn generate_agreement_keypair(&self) -> Result<AgreementKeyPair, CryptoError> {
        let engines = Arc::clone(&self.engines);
        offload(move || engines.agreement.generate_keypair()).await
    }

    /// Recompute the signing public key from its private half.
    pub async fn signing_public_key(&self, private_key: &PrivateKeyPem) -> Result<String, CryptoError> {
        let engines = Arc::clone(&self.engines);
        let private_key = private_key.clone();
        offload(move || engines.signer.public_key(private_key.as_str())).await
    }

    /// Recompute the agreement public key from its private half.
    pub async fn agreement_public_key(
        &self,
        private_key: &PrivateKeyPem,
    ) -> Result<String, CryptoError> {
        let engines = Arc::clone(&self.engines);
        let private_key = private_key.clone();
        offload(move || engines.agreement.public_key(private_key.as_str())).await
    }

    pub async fn sign_string(
        &self,
        private_key: &PrivateKeyPem,
        message: &str,
    ) -> Result<String, CryptoError> {
        let engines = Arc::clone(&self.engines);
        let private_key = private_key.clone();
        let message = message.to_owned();
        offload(move || engines.signer.sign(private_key.as_str(), &message)).await
    }

    pub async fn verify_signature(
        &self,
        public_key: &str,
        message: &str,
        signature: &str,
    ) -> Result<bool, CryptoError> {
        let engines = Arc::clone(&self.engines);
        let (public_key, message, signature) =
            (public_key.to_owned(), message.to_owned(), signature.to_owned());
        offload(move || engines.signer.verify(&public_key, &message, &signature)).await
    }

    /// Encrypt `plaintext` for the holder of `recipient`.
    ///
    /// The recipient's agreement key must carry a valid signature by their
    /// signing key. Otherwise this fails with `SecurityError` and no key is
    /// derived.
    pub async fn encrypt_message(
        &self,
        sender: &SenderKeys,
        recipient: &PublicKeysResponse,
        plaintext: &str,
        content_type: Option<String>,
    ) -> Result<EncryptedEnvelope, CryptoError> {
        tracing::debug!("encrypting message");
        let engines = Arc::clone(&self.engines);
        let sender = sender.clone();
        let recipient = recipient.clone();
        let plaintext = zeroize::Zeroizing::new(plaintext.to_owned());
        offload(move || encrypt(&engines, &sender, &recipient, &plaintext, content_type)).await
    }

    /// Decrypt `envelope` with our agreement private key.
    ///
    /// `SecurityError` means the sender's agreement key is not bound to
    /// `sender_signing_public_key`; `AuthenticationFailed` means the binding
    /// held but the ciphertext did not open under the derived key.
    pub async fn decrypt_message(
        &self,
        own_agreement_private_key: &PrivateKeyPem,
        sender_signing_public_key: &str,
        envelope: &EncryptedEnvelope,
    ) -> Result<String, CryptoError> {
        tracing::debug!("decrypting message");
        let engines = Arc::clone(&self.engines);
        let own = own_agreement_private_key.clone();
        let sender_signing_public_key = sender_signing_public_key.to_owned();
        let envelope = envelope.clone();
        offload(move || decrypt(&engines, &own, &sender_signing_public_key, &envelope)).await
    }
}

fn encrypt<S, K, C>(
    engines: &Engines<S, K, C>,
    sender: &SenderKeys,
    recipient: &PublicKeysResponse,
    plaintext: &str,
    content_type: Option<String>,
) -> Result<EncryptedEnvelope, CryptoError>
where
    S: SignatureProvider,
    K: AgreementProvider,
    C: CipherProvider,
{
    let trusted = engines.signer.verify(
        &recipient.signing_public_key,
        &recipient.agreement_public_key,
        &recipient.agreement_key_signature,
    )?;
    if !trusted {
        tracing::error!("recipient agreement key signature did not verify");
        return Err(CryptoError::SecurityError(
            "recipient agreement key signature is invalid, possible MITM".into(),
        ));
    }

    let ephemeral_signature = engines
        .signer
        .sign(sender.signing_private_key.as_str(), &sender.agreement.public)?;
    let key = engines
        .agreement
        .derive_shared_secret(sender.agreement.private.as_str(), &recipient.agreement_public_key)?;
    let ciphertext = engines.cipher.encrypt(plaintext, key.as_bytes())?;

    Ok(EncryptedEnvelope {
        ciphertext,
        sender_ephemeral_agreement_public_key: sender.agreement.public.clone(),
        sender_ephemeral_signature: ephemeral_signature,
        content_type,
    })
}

fn decrypt<S, K, C>(
    engines: &Engines<S, K, C>,
    own_agreement_private_key: &PrivateKeyPem,
    sender_signing_public_key: &str,
    envelope: &EncryptedEnvelope,
) -> Result<String, CryptoError>
where
    S: SignatureProvider,
    K: AgreementProvider,
    C: CipherProvider,
{
    let trusted = engines.signer.verify(
        sender_signing_public_key,
        &envelope.sender_ephemeral_agreement_public_key,
        &envelope.sender_ephemeral_signature,
    )?;
    if !trusted {
        tracing::error!("sender ephemeral key signature did not verify");
        return Err(CryptoError::SecurityError(
            "sender ephemeral key signature is invalid, possible MITM".into(),
        ));
    }

    let key = engines.agreement.derive_shared_secret(
        own_agreement_private_key.as_str(),
        &envelope.sender_ephemeral_agreement_public_key,
    )?;
    engines
        .cipher
        .decrypt(&envelope.ciphertext, key.as_bytes())
        .inspect_err(|e| {
            if matches!(e, CryptoError::AuthenticationFailed) {
                tracing::warn!("message failed authentication, key desync or corruption");
            }
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps the real engines and counts calls to each primitive.
    #[derive(Default)]
    pub(crate) struct Counting<E> {
        pub inner: E,
        pub calls: AtomicUsize,
    }

    impl<E> Counting<E> {
        pub fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
        fn hit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SignatureProvider for Counting<SignatureEngine> {
        fn generate_keypair(&self) -> Result<SigningKeyPair, CryptoError> {
            self.inner.generate_keypair()
        }
        fn public_key(&self, private_key: &str) -> Result<String, CryptoError> {
            self.inner.public_key(private_key)
        }
        fn sign(&self, private_key: &str, message: &str) -> Result<String, CryptoError> {
            self.hit();
            self.inner.sign(private_key, message)
        }
        fn verify(&self, public_key: &str, message: &str, signature: &str) -> Result<bool, CryptoError> {
            self.inner.verify(public_key, message, signature)
        }
    }

    impl AgreementProvider for Counting<KeyAgreementEngine> {
        fn generate_keypair(&self) -> Result<AgreementKeyPair, CryptoError> {
            self.inner.generate_keypair()
        }
        fn public_key(&self, private_key: &str) -> Result<String, CryptoError> {
            self.inner.public_key(private_key)
        }
        fn derive_shared_secret(&self, own: &str, peer: &str) -> Result<SharedKey, CryptoError> {
            self.hit();
            self.inner.derive_shared_secret(own, peer)
        }
    }

    impl CipherProvider for Counting<SymmetricCipher> {
        fn encrypt(&self, plaintext: &str, key: &[u8]) -> Result<String, CryptoError> {
            self.hit();
            self.inner.encrypt(plaintext, key)
        }
        fn decrypt(&self, ciphertext: &str, key: &[u8]) -> Result<String, CryptoError> {
            self.hit();
            self.inner.decrypt(ciphertext, key)
        }
    }

    type CountingProtocol = EncryptionProtocol<
        Counting<SignatureEngine>,
        Counting<KeyAgreementEngine>,
        Counting<SymmetricCipher>,
    >;

    fn counting_protocol() -> CountingProtocol {
        EncryptionProtocol::new(Counting::default(), Counting::default(), Counting::default())
    }

    struct Party {
        keys: IdentityKeys,
    }

    impl Party {
        async fn new<S: SignatureProvider, K: AgreementProvider, C: CipherProvider>(
            protocol: &EncryptionProtocol<S, K, C>,
        ) -> Self {
            Self {
                keys: protocol.generate_key_pairs().await.unwrap(),
            }
        }

        fn sender(&self) -> SenderKeys {
            SenderKeys {
                signing_private_key: self.keys.signing.private.clone(),
                agreement: self.keys.agreement.clone(),
            }
        }

        fn record(&self, protocol: &EncryptionProtocol) -> PublicKeysResponse {
            let signature = protocol
                .signer()
                .sign(self.keys.signing.private.as_str(), &self.keys.agreement.public)
                .unwrap();
            PublicKeysResponse {
                signing_public_key: self.keys.signing.public.clone(),
                agreement_public_key: self.keys.agreement.public.clone(),
                agreement_key_signature: signature,
            }
        }
    }

    #[tokio::test]
    async fn test_encrypt_then_decrypt_round_trips() {
        let protocol = EncryptionProtocol::default();
        let alice = Party::new(&protocol).await;
        let bob = Party::new(&protocol).await;

        let envelope = protocol
            .encrypt_message(&alice.sender(), &bob.record(&protocol), "hello bob", Some("text".into()))
            .await
            .unwrap();
        assert_eq!(envelope.content_type.as_deref(), Some("text"));
        assert_eq!(envelope.sender_ephemeral_agreement_public_key, alice.keys.agreement.public);

        let plaintext = protocol
            .decrypt_message(&bob.keys.agreement.private, &alice.keys.signing.public, &envelope)
            .await
            .unwrap();
        assert_eq!(plaintext, "hello bob");
    }

    #[tokio::test]
    async fn test_spoofed_recipient_record_never_reaches_derivation() {
        let protocol = counting_protocol();
        let reference = EncryptionProtocol::default();
        let alice = Party::new(&protocol).await;
        let bob = Party::new(&protocol).await;
        let mallory = Party::new(&protocol).await;

        // Bob's signing key, Mallory's agreement key signed by Mallory.
        let mut record = bob.record(&reference);
        record.agreement_public_key = mallory.keys.agreement.public.clone();
        record.agreement_key_signature = mallory.record(&reference).agreement_key_signature;

        let result = protocol
            .encrypt_message(&alice.sender(), &record, "secret", None)
            .await;
        assert!(matches!(result, Err(CryptoError::SecurityError(_))));
        assert_eq!(protocol.signer().count(), 0);
        assert_eq!(protocol.agreement().count(), 0);
        assert_eq!(protocol.cipher().count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_recipient_signature_aborts_before_crypto() {
        let protocol = counting_protocol();
        let reference = EncryptionProtocol::default();
        let alice = Party::new(&protocol).await;
        let bob = Party::new(&protocol).await;

        let mut record = bob.record(&reference);
        record.agreement_key_signature = "%%%".into();

        let result = protocol
            .encrypt_message(&alice.sender(), &record, "secret", None)
            .await;
        assert!(matches!(result, Err(CryptoError::MalformedSignature(_))));
        assert_eq!(protocol.agreement().count(), 0);
        assert_eq!(protocol.cipher().count(), 0);
    }

    #[tokio::test]
    async fn test_forged_sender_binding_is_never_decrypted() {
        let protocol = counting_protocol();
        let reference = EncryptionProtocol::default();
        let alice = Party::new(&protocol).await;
        let bob = Party::new(&protocol).await;
        let mallory = Party::new(&protocol).await;

        let envelope = reference
            .encrypt_message(&mallory.sender(), &bob.record(&reference), "trust me", None)
            .await
            .unwrap();

        // Bob believes the message came from Alice.
        let result = protocol
            .decrypt_message(&bob.keys.agreement.private, &alice.keys.signing.public, &envelope)
            .await;
        assert!(matches!(result, Err(CryptoError::SecurityError(_))));
        assert_eq!(protocol.agreement().count(), 0);
        assert_eq!(protocol.cipher().count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_recipient_key_is_authentication_failure() {
        let protocol = EncryptionProtocol::default();
        let alice = Party::new(&protocol).await;
        let bob = Party::new(&protocol).await;
        let carol = Party::new(&protocol).await;

        let envelope = protocol
            .encrypt_message(&alice.sender(), &bob.record(&protocol), "for bob", None)
            .await
            .unwrap();
        let result = protocol
            .decrypt_message(&carol.keys.agreement.private, &alice.keys.signing.public, &envelope)
            .await;
        assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
    }

    #[tokio::test]
    async fn test_successful_encrypt_touches_each_engine_once() {
        let protocol = counting_protocol();
        let reference = EncryptionProtocol::default();
        let alice = Party::new(&protocol).await;
        let bob = Party::new(&protocol).await;

        protocol
            .encrypt_message(&alice.sender(), &bob.record(&reference), "hi", None)
            .await
            .unwrap();
        assert_eq!(protocol.signer().count(), 1);
        assert_eq!(protocol.agreement().count(), 1);
        assert_eq!(protocol.cipher().count(), 1);
    }

    #[tokio::test]
    async fn test_sign_and_verify_pass_through() {
        let protocol = EncryptionProtocol::default();
        let alice = Party::new(&protocol).await;
        let sig = protocol
            .sign_string(&alice.keys.signing.private, "challenge-123")
            .await
            .unwrap();
        assert!(protocol
            .verify_signature(&alice.keys.signing.public, "challenge-123", &sig)
            .await
            .unwrap());
        assert!(!protocol
            .verify_signature(&alice.keys.signing.public, "challenge-124", &sig)
            .await
            .unwrap());
    }

    #[test]
    fn test_envelope_maps_to_wire_request() {
        let envelope = EncryptedEnvelope {
            ciphertext: "ct".into(),
            sender_ephemeral_agreement_public_key: "pem".into(),
            sender_ephemeral_signature: "sig".into(),
            content_type: Some("image/png".into()),
        };
        let req = envelope.into_send_request(UserId(9));
        assert_eq!(req.recipient_id, UserId(9));
        assert_eq!(req.message, "ct");
        assert_eq!(req.ephemeral_public_key, "pem");
        assert_eq!(req.ephemeral_signature, "sig");
        assert_eq!(req.content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_envelope_serializes_with_wire_names() {
        let envelope = EncryptedEnvelope {
            ciphertext: "ct".into(),
            sender_ephemeral_agreement_public_key: "pem".into(),
            sender_ephemeral_signature: "sig".into(),
            content_type: None,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["ciphertext"], "ct");
        assert_eq!(json["sender_ephemeral_agreement_public_key"], "pem");
        assert_eq!(json["sender_ephemeral_signature"], "sig");
        assert!(json["content_type"].is_null());

        let back: EncryptedEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }
}
