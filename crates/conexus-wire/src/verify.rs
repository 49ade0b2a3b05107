//! Signature verification for registrations and envelopes.
//!
//! The router and gateway only see the [`SignatureVerifier`] trait. Which
//! implementation is active depends on [`AuthMode`].

use crate::error::WireError;
use conexus_types::config::{AuthMode, GatewayConfig};
use conexus_types::identity::{decode_signature, public_key_from_did, verify_with_key, DID_PREFIX};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Checks that `signature` over `payload` was produced by `identity`.
pub trait SignatureVerifier: Send + Sync {
    /// `public_key` is the hex key the identity registered with.
    fn verify(&self, payload: &[u8], identity: &str, public_key: &str, signature: &str) -> bool;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Ed25519 signatures against each agent's registered key.
///
/// For `did:conexus:` identities the registered key must also be the one
/// embedded in the DID, so an agent cannot claim another agent's identity
/// with its own key.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, payload: &[u8], identity: &str, public_key: &str, signature: &str) -> bool {
        if identity.starts_with(DID_PREFIX) {
            match public_key_from_did(identity) {
                Ok(embedded) if embedded == public_key.trim().to_ascii_lowercase() => {}
                _ => return false,
            }
        }
        let Ok(raw) = decode_signature(signature) else {
            return false;
        };
        verify_with_key(public_key, payload, &raw)
    }

    fn name(&self) -> &'static str {
        "ed25519"
    }
}

/// HMAC-SHA256 with a secret shared by every agent. Signatures are hex.
#[derive(Clone)]
pub struct HmacSha256Verifier {
    secret: String,
}

impl std::fmt::Debug for HmacSha256Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSha256Verifier").finish_non_exhaustive()
    }
}

impl HmacSha256Verifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl SignatureVerifier for HmacSha256Verifier {
    fn verify(&self, payload: &[u8], _identity: &str, _public_key: &str, signature: &str) -> bool {
        hmac_verify(&self.secret, payload, signature)
    }

    fn name(&self) -> &'static str {
        "hmac-sha256"
    }
}

/// Generate an HMAC-SHA256 signature, hex-encoded.
pub fn hmac_sign(secret: &str, data: &[u8]) -> String {
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(data);
            hex::encode(mac.finalize().into_bytes())
        }
        // HMAC accepts keys of any length.
        Err(_) => String::new(),
    }
}

/// Verify an HMAC-SHA256 signature using constant-time comparison.
pub fn hmac_verify(secret: &str, data: &[u8], signature: &str) -> bool {
    let expected = hmac_sign(secret, data);
    if expected.is_empty() {
        return false;
    }
    subtle::ConstantTimeEq::ct_eq(expected.as_bytes(), signature.as_bytes()).into()
}

/// Build the verifier selected by the gateway configuration.
pub fn verifier_for(config: &GatewayConfig) -> Result<Arc<dyn SignatureVerifier>, WireError> {
    match config.auth {
        AuthMode::Ed25519 => Ok(Arc::new(Ed25519Verifier)),
        AuthMode::SharedSecret => {
            if config.shared_secret.is_empty() {
                return Err(WireError::Config(
                    "auth = \"shared_secret\" requires [gateway] shared_secret".into(),
                ));
            }
            Ok(Arc::new(HmacSha256Verifier::new(config.shared_secret.clone())))
        }
    }
}
