use crate::ids::{MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to deliver an encrypted message to a recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub recipient_id: UserId,
    /// base64(nonce ‖ ciphertext ‖ tag)
    pub message: String,
    pub content_type: Option<String>,
    /// Sender's current agreement public key (PEM).
    pub ephemeral_public_key: String,
    /// Signature over `ephemeral_public_key` by the sender's signing key (base64).
    pub ephemeral_signature: String,
}

/// Transport acknowledgement for an accepted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub id: MessageId,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// An encrypted message delivered by push or pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub message: String,
    pub content_type: Option<String>,
    pub ephemeral_public_key: String,
    pub ephemeral_signature: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_request_includes_all_fields() {
        let req = SendMessageRequest {
            recipient_id: UserId(5),
            message: "enc_data".into(),
            content_type: None,
            ephemeral_public_key: "pem".into(),
            ephemeral_signature: "sig".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["recipient_id"], 5);
        assert_eq!(json["message"], "enc_data");
        assert!(json["content_type"].is_null());
        assert_eq!(json["ephemeral_public_key"], "pem");
        assert_eq!(json["ephemeral_signature"], "sig");
    }

    #[test]
    fn send_message_response_timestamp_is_optional() {
        let resp: SendMessageResponse = serde_json::from_str(r#"{"id": 17}"#).unwrap();
        assert_eq!(resp.id, MessageId(17));
        assert!(resp.timestamp.is_none());
    }

    #[test]
    fn incoming_message_deserializes() {
        let json = r#"{
            "id": 3,
            "sender_id": 8,
            "message": "Y2lwaGVy",
            "content_type": "text",
            "ephemeral_public_key": "pem",
            "ephemeral_signature": "sig",
            "timestamp": "2025-01-01T12:00:00Z"
        }"#;
        let msg: IncomingMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, MessageId(3));
        assert_eq!(msg.sender_id, UserId(8));
        assert_eq!(msg.content_type.as_deref(), Some("text"));
    }
}
