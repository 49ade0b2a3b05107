//! Signed signaling envelopes exchanged between agents.
//!
//! An envelope's signature covers a canonical serialization of
//! `(type, sender, payload, timestamp)`: compact JSON with object keys
//! sorted at every depth. The canonical form is produced by hand so it
//! does not depend on whether serde_json preserves insertion order.

use crate::identity::AgentIdentity;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of signaling envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeType {
    /// Session description offer.
    Offer,
    /// Session description answer.
    Answer,
    /// Connectivity candidate.
    IceCandidate,
    /// Error report, usually from the gateway back to a sender.
    Error,
    /// Liveness signal.
    Heartbeat,
}

impl EnvelopeType {
    /// Wire name of the type, as used in the canonical signing form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "OFFER",
            Self::Answer => "ANSWER",
            Self::IceCandidate => "ICE_CANDIDATE",
            Self::Error => "ERROR",
            Self::Heartbeat => "HEARTBEAT",
        }
    }
}

impl std::fmt::Display for EnvelopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes carried in ERROR envelope payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Sender is not a registered, active agent.
    UnknownSender,
    /// Signature did not verify against the sender's registered key.
    InvalidSignature,
    /// Timestamp older than the sender's last accepted envelope.
    StaleMessage,
    /// Recipient is missing or not registered.
    UnknownRecipient,
    /// Recipient's connection could not accept the envelope.
    DeliveryFailed,
    /// Envelope sender differs from the identity bound to the connection.
    SenderMismatch,
    /// Frame could not be parsed.
    MalformedMessage,
    /// Unexpected gateway failure.
    InternalError,
}

/// A signed, typed signaling message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Unique envelope ID (UUID v4).
    pub id: String,
    /// Envelope kind.
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    /// Sender identity.
    pub sender: String,
    /// Recipient identity. Absent for liveness-only heartbeats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    /// Type-dependent content, opaque to the gateway.
    #[serde(default)]
    pub payload: Value,
    /// Logical send time in milliseconds.
    pub timestamp: u64,
    /// Base64 Ed25519 signature over the canonical signing bytes.
    #[serde(default)]
    pub signature: String,
    /// ID of the envelope this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl MessageEnvelope {
    /// Build and sign an envelope.
    pub fn signed(
        identity: &AgentIdentity,
        kind: EnvelopeType,
        recipient: Option<String>,
        payload: Value,
        timestamp: u64,
    ) -> Self {
        let mut envelope = Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            sender: identity.did().to_string(),
            recipient,
            payload,
            timestamp,
            signature: String::new(),
            correlation_id: None,
        };
        envelope.signature = identity.sign(&envelope.signing_bytes());
        envelope
    }

    /// Build a signed ERROR envelope reporting why `failed` was not delivered.
    pub fn error_reply(
        gateway: &AgentIdentity,
        failed: &MessageEnvelope,
        code: ErrorCode,
        message: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        let payload = serde_json::json!({
            "code": code,
            "message": message.into(),
        });
        let mut reply = Self::signed(
            gateway,
            EnvelopeType::Error,
            Some(failed.sender.clone()),
            payload,
            timestamp,
        );
        reply.correlation_id = Some(failed.id.clone());
        reply
    }

    /// Canonical bytes covered by the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        signing_bytes(self.kind, &self.sender, &self.payload, self.timestamp)
    }

    /// The error code of an ERROR envelope, if present.
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.kind != EnvelopeType::Error {
            return None;
        }
        self.payload
            .get("code")
            .and_then(|c| serde_json::from_value(c.clone()).ok())
    }
}

/// Canonical signing bytes for `(type, sender, payload, timestamp)`.
pub fn signing_bytes(kind: EnvelopeType, sender: &str, payload: &Value, timestamp: u64) -> Vec<u8> {
    let doc = serde_json::json!({
        "payload": payload,
        "sender": sender,
        "timestamp": timestamp,
        "type": kind.as_str(),
    });
    let mut out = String::new();
    write_canonical(&doc, &mut out);
    out.into_bytes()
}

/// Serialize a JSON value compactly with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Current wall-clock time in milliseconds since the UNIX epoch.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{decode_signature, verify_with_key};
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": true, "m": [3, {"y": null, "x": "s"}]}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"m":[3,{"x":"s","y":null}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn test_signed_envelope_verifies() {
        let identity = AgentIdentity::generate();
        let envelope = MessageEnvelope::signed(
            &identity,
            EnvelopeType::Offer,
            Some("did:conexus:peer".to_string()),
            json!({"sdp": "v=0"}),
            1_000,
        );
        let sig = decode_signature(&envelope.signature).unwrap();
        assert!(verify_with_key(
            &identity.public_key_hex(),
            &envelope.signing_bytes(),
            &sig
        ));
    }

    #[test]
    fn test_signature_excludes_recipient_but_covers_payload() {
        let identity = AgentIdentity::generate();
        let mut envelope = MessageEnvelope::signed(
            &identity,
            EnvelopeType::Answer,
            Some("did:conexus:a".to_string()),
            json!({"sdp": "answer"}),
            5,
        );
        let sig = decode_signature(&envelope.signature).unwrap();
        let key = identity.public_key_hex();

        envelope.recipient = Some("did:conexus:b".to_string());
        assert!(verify_with_key(&key, &envelope.signing_bytes(), &sig));

        envelope.payload = json!({"sdp": "tampered"});
        assert!(!verify_with_key(&key, &envelope.signing_bytes(), &sig));
    }

    #[test]
    fn test_wire_format() {
        let identity = AgentIdentity::generate();
        let envelope = MessageEnvelope::signed(
            &identity,
            EnvelopeType::IceCandidate,
            None,
            json!({"candidate": "candidate:1 1 udp"}),
            42,
        );
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""type":"ICE_CANDIDATE""#));
        assert!(!json.contains("recipient"));
        let decoded: MessageEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_error_reply() {
        let agent = AgentIdentity::generate();
        let gateway = AgentIdentity::generate();
        let failed = MessageEnvelope::signed(
            &agent,
            EnvelopeType::Offer,
            Some("did:conexus:gone".to_string()),
            json!({}),
            7,
        );
        let reply = MessageEnvelope::error_reply(
            &gateway,
            &failed,
            ErrorCode::UnknownRecipient,
            "recipient not connected",
            8,
        );
        assert_eq!(reply.kind, EnvelopeType::Error);
        assert_eq!(reply.recipient.as_deref(), Some(agent.did()));
        assert_eq!(reply.correlation_id.as_deref(), Some(failed.id.as_str()));
        assert_eq!(reply.error_code(), Some(ErrorCode::UnknownRecipient));
    }
}
