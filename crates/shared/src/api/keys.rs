use serde::{Deserialize, Serialize};

/// A principal's current public keys as served by the key directory.
///
/// `ecdh_signature` is a signature over `ecdh_public_key` made with the
/// principal's signing key. Clients must check it on every use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeysResponse {
    #[serde(rename = "ecdsa_public_key")]
    pub signing_public_key: String,
    #[serde(rename = "ecdh_public_key")]
    pub agreement_public_key: String,
    #[serde(rename = "ecdh_signature")]
    pub agreement_key_signature: String,
}

/// Request to publish a freshly rotated agreement public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAgreementKeyRequest {
    #[serde(rename = "ecdh_public_key")]
    pub agreement_public_key: String,
    #[serde(rename = "ecdh_signature")]
    pub agreement_key_signature: String,
}

/// Registration payload carrying both long-term public keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterKeysRequest {
    pub username: String,
    #[serde(rename = "ecdsa_public_key")]
    pub signing_public_key: String,
    #[serde(rename = "ecdh_public_key")]
    pub agreement_public_key: String,
    #[serde(rename = "ecdh_signature")]
    pub agreement_key_signature: String,
}
