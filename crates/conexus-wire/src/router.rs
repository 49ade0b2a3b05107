//! Message router: validates signed envelopes and forwards them.
//!
//! Validation order is fixed: sender existence, signature, freshness,
//! recipient existence. The signature check is skipped for unknown senders.
//! Every outcome is a [`RouteOutcome`] value; the router never errors and
//! never retries.

use crate::message::WireFrame;
use crate::registry::{ActivityCheck, AgentRegistry, DeliveryError};
use crate::verify::SignatureVerifier;
use conexus_types::envelope::{EnvelopeType, ErrorCode, MessageEnvelope};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of routing one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOutcome {
    /// Enqueued on the recipient's connection.
    Delivered,
    /// Valid recipient-less heartbeat; liveness updated, nothing forwarded.
    Acknowledged,
    UnknownSender,
    InvalidSignature,
    StaleMessage,
    UnknownRecipient,
    DeliveryFailed,
}

impl RouteOutcome {
    /// Whether the envelope was accepted.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Delivered | Self::Acknowledged)
    }

    /// Error code to report back to the sender, if any.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Delivered | Self::Acknowledged => None,
            Self::UnknownSender => Some(ErrorCode::UnknownSender),
            Self::InvalidSignature => Some(ErrorCode::InvalidSignature),
            Self::StaleMessage => Some(ErrorCode::StaleMessage),
            Self::UnknownRecipient => Some(ErrorCode::UnknownRecipient),
            Self::DeliveryFailed => Some(ErrorCode::DeliveryFailed),
        }
    }

    /// Human-readable explanation for ERROR envelopes.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Acknowledged => "acknowledged",
            Self::UnknownSender => "sender is not a registered agent",
            Self::InvalidSignature => "signature does not verify against the sender's key",
            Self::StaleMessage => "timestamp is older than the last accepted envelope",
            Self::UnknownRecipient => "recipient is not connected",
            Self::DeliveryFailed => "recipient connection could not accept the envelope",
        }
    }
}

/// Running counters of routing outcomes.
#[derive(Debug, Default)]
pub struct RouterStats {
    delivered: AtomicU64,
    acknowledged: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`RouterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStatsSnapshot {
    pub delivered: u64,
    pub acknowledged: u64,
    /// Rejected during validation or for an unknown recipient.
    pub rejected: u64,
    /// Valid envelopes whose delivery failed.
    pub failed: u64,
}

impl RouterStats {
    fn record(&self, outcome: RouteOutcome) {
        let counter = match outcome {
            RouteOutcome::Delivered => &self.delivered,
            RouteOutcome::Acknowledged => &self.acknowledged,
            RouteOutcome::DeliveryFailed => &self.failed,
            _ => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Validates envelopes and forwards them through the registry.
pub struct MessageRouter {
    registry: AgentRegistry,
    verifier: Arc<dyn SignatureVerifier>,
    stats: RouterStats,
}

impl MessageRouter {
    pub fn new(registry: AgentRegistry, verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self {
            registry,
            verifier,
            stats: RouterStats::default(),
        }
    }

    /// The verifier used for envelope signatures.
    pub fn verifier(&self) -> &Arc<dyn SignatureVerifier> {
        &self.verifier
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Validate `envelope` and forward it to its recipient.
    pub fn route(&self, envelope: &MessageEnvelope) -> RouteOutcome {
        let outcome = self.route_inner(envelope);
        self.stats.record(outcome);
        match outcome {
            RouteOutcome::Delivered | RouteOutcome::Acknowledged => debug!(
                id = %envelope.id,
                kind = %envelope.kind,
                sender = %envelope.sender,
                ?outcome,
                "envelope routed"
            ),
            RouteOutcome::DeliveryFailed => warn!(
                id = %envelope.id,
                sender = %envelope.sender,
                recipient = envelope.recipient.as_deref().unwrap_or(""),
                "delivery failed"
            ),
            _ => debug!(
                id = %envelope.id,
                kind = %envelope.kind,
                sender = %envelope.sender,
                ?outcome,
                "envelope rejected"
            ),
        }
        outcome
    }

    fn route_inner(&self, envelope: &MessageEnvelope) -> RouteOutcome {
        // 1. Sender must be active.
        let Some(sender) = self.registry.resolve(&envelope.sender) else {
            return RouteOutcome::UnknownSender;
        };

        // 2. Signature against the registered key.
        if !self.verifier.verify(
            &envelope.signing_bytes(),
            &sender.identity,
            &sender.public_key,
            &envelope.signature,
        ) {
            return RouteOutcome::InvalidSignature;
        }

        // 3. Replay window; also refreshes the sender's liveness.
        match self.registry.accept_activity(&sender.identity, envelope.timestamp) {
            ActivityCheck::Accepted => {}
            ActivityCheck::Stale { .. } => return RouteOutcome::StaleMessage,
            ActivityCheck::Unknown => return RouteOutcome::UnknownSender,
        }

        // 4. Recipient.
        let Some(recipient) = envelope.recipient.as_deref() else {
            return if envelope.kind == EnvelopeType::Heartbeat {
                RouteOutcome::Acknowledged
            } else {
                RouteOutcome::UnknownRecipient
            };
        };

        // 5. Deliver.
        match self
            .registry
            .deliver(recipient, WireFrame::signal(envelope.clone()))
        {
            Ok(()) => RouteOutcome::Delivered,
            Err(DeliveryError::UnknownAgent) => RouteOutcome::UnknownRecipient,
            Err(DeliveryError::QueueFull | DeliveryError::Closed) => RouteOutcome::DeliveryFailed,
        }
    }
}
