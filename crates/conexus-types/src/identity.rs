//! Ed25519 agent identities.
//!
//! An agent's identity string is a DID that embeds its public key:
//! `did:conexus:<hex(ed25519 public key)>`. Embedding the key lets a
//! verifier check that the key an agent registered with actually belongs
//! to the identity it claims.
//!
//! Signatures travel base64-encoded; public keys travel hex-encoded.

use crate::error::IdentityError;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// DID method prefix for Conexus identities.
pub const DID_PREFIX: &str = "did:conexus:";

/// An agent keypair together with its derived DID.
#[derive(Clone)]
pub struct AgentIdentity {
    signing_key: SigningKey,
    did: String,
}

impl std::fmt::Debug for AgentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentIdentity")
            .field("did", &self.did)
            .finish_non_exhaustive()
    }
}

impl AgentIdentity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Build an identity from an existing signing key.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let did = did_for_key(&signing_key.verifying_key());
        Self { signing_key, did }
    }

    /// Restore an identity from a hex-encoded 32-byte secret seed.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| IdentityError::InvalidSecretKey(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::InvalidSecretKey("expected 32 bytes".to_string()))?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&seed)))
    }

    /// The DID of this identity.
    pub fn did(&self) -> &str {
        &self.did
    }

    /// Hex-encoded public key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Hex-encoded secret seed. Handle with care.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Sign `data` and return the base64-encoded signature.
    pub fn sign(&self, data: &[u8]) -> String {
        let signature = self.signing_key.sign(data);
        base64::engine::general_purpose::STANDARD.encode(signature.to_bytes())
    }
}

/// Compute the DID for a verifying key.
pub fn did_for_key(key: &VerifyingKey) -> String {
    format!("{DID_PREFIX}{}", hex::encode(key.to_bytes()))
}

/// Parse a hex-encoded Ed25519 public key.
pub fn parse_public_key(public_key_hex: &str) -> Result<VerifyingKey, IdentityError> {
    let bytes = hex::decode(public_key_hex.trim())
        .map_err(|e| IdentityError::InvalidPublicKey(e.to_string()))?;
    let key_bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| IdentityError::InvalidPublicKey("expected 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&key_bytes).map_err(|e| IdentityError::InvalidPublicKey(e.to_string()))
}

/// Extract the hex public key embedded in a Conexus DID.
pub fn public_key_from_did(did: &str) -> Result<String, IdentityError> {
    let key = did
        .strip_prefix(DID_PREFIX)
        .ok_or_else(|| IdentityError::InvalidDid(did.to_string()))?;
    parse_public_key(key)?;
    Ok(key.to_ascii_lowercase())
}

/// Decode a base64 signature into raw bytes.
pub fn decode_signature(signature_b64: &str) -> Result<Vec<u8>, IdentityError> {
    base64::engine::general_purpose::STANDARD
        .decode(signature_b64.trim())
        .map_err(|e| IdentityError::MalformedSignature(e.to_string()))
}

/// Verify a raw Ed25519 signature over `data` with a hex public key.
pub fn verify_with_key(public_key_hex: &str, data: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = parse_public_key(public_key_hex) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    key.verify(data, &Signature::from_bytes(&sig_bytes)).is_ok()
}

/// Bytes an agent signs to prove key possession when registering.
///
/// `nonce` is the challenge the gateway issued for this connection, so a
/// captured registration cannot be replayed on another one.
pub fn registration_signing_bytes(
    identity: &str,
    public_key_hex: &str,
    timestamp: u64,
    nonce: &str,
) -> Vec<u8> {
    format!("register|{identity}|{public_key_hex}|{timestamp}|{nonce}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let identity = AgentIdentity::generate();
        let sig = identity.sign(b"offer");
        let raw = decode_signature(&sig).unwrap();
        assert!(verify_with_key(&identity.public_key_hex(), b"offer", &raw));
        assert!(!verify_with_key(&identity.public_key_hex(), b"answer", &raw));
    }

    #[test]
    fn test_wrong_key_fails() {
        let signer = AgentIdentity::generate();
        let other = AgentIdentity::generate();
        let raw = decode_signature(&signer.sign(b"payload")).unwrap();
        assert!(!verify_with_key(&other.public_key_hex(), b"payload", &raw));
    }

    #[test]
    fn test_did_embeds_public_key() {
        let identity = AgentIdentity::generate();
        assert!(identity.did().starts_with(DID_PREFIX));
        assert_eq!(
            public_key_from_did(identity.did()).unwrap(),
            identity.public_key_hex()
        );
    }

    #[test]
    fn test_public_key_from_foreign_did_rejected() {
        assert!(matches!(
            public_key_from_did("did:key:z6MkSomething"),
            Err(IdentityError::InvalidDid(_))
        ));
        assert!(public_key_from_did("did:conexus:nothex").is_err());
    }

    #[test]
    fn test_secret_roundtrip_preserves_did() {
        let identity = AgentIdentity::generate();
        let restored = AgentIdentity::from_secret_hex(&identity.secret_hex()).unwrap();
        assert_eq!(restored.did(), identity.did());
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let identity = AgentIdentity::generate();
        assert!(!verify_with_key(&identity.public_key_hex(), b"x", &[0u8; 10]));
    }

    #[test]
    fn test_registration_proof_bound_to_nonce() {
        let identity = AgentIdentity::generate();
        let pk = identity.public_key_hex();
        let signed = registration_signing_bytes(identity.did(), &pk, 7, "nonce-a");
        let raw = decode_signature(&identity.sign(&signed)).unwrap();
        assert!(verify_with_key(&pk, &signed, &raw));

        let other = registration_signing_bytes(identity.did(), &pk, 7, "nonce-b");
        assert!(!verify_with_key(&pk, &other, &raw));
    }
}
