//! GatewayClient: the agent side of the signaling protocol.
//!
//! Connecting (TCP connect + registration) runs under a [`RetryManager`],
//! so a gateway that is briefly unreachable is retried with backoff
//! instead of failing the agent outright.

use crate::error::WireError;
use crate::message::*;
use crate::verify::hmac_sign;
use conexus_runtime::retry::{RetryManager, RetryOutcome};
use conexus_types::agent::AgentSummary;
use conexus_types::envelope::{now_millis, EnvelopeType, MessageEnvelope};
use conexus_types::identity::{registration_signing_bytes, AgentIdentity};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info};

/// Connection settings for a [`GatewayClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway address, e.g. `127.0.0.1:7400`.
    pub addr: String,
    /// Capabilities advertised at registration.
    pub capabilities: Vec<String>,
    /// Sign with HMAC-SHA256 over this secret instead of the identity key.
    pub shared_secret: Option<String>,
    /// Largest frame accepted from the gateway.
    pub max_frame_bytes: u32,
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            capabilities: Vec::new(),
            shared_secret: None,
            max_frame_bytes: 10 * 1024 * 1024,
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = String>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn with_shared_secret(mut self, secret: impl Into<String>) -> Self {
        self.shared_secret = Some(secret.into());
        self
    }
}

/// A registered connection to a gateway.
pub struct GatewayClient {
    identity: AgentIdentity,
    config: ClientConfig,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    session_id: String,
    gateway_identity: String,
    last_timestamp: u64,
    /// Frames read while waiting for a specific reply.
    pending: VecDeque<WireFrame>,
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("identity", &self.identity.did())
            .field("addr", &self.config.addr)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl GatewayClient {
    /// Connect and register, retrying per `retry`.
    pub async fn connect(
        config: ClientConfig,
        identity: AgentIdentity,
        retry: &RetryManager,
    ) -> Result<Self, WireError> {
        let (_keep_alive, cancel) = watch::channel(false);
        Self::connect_with_cancel(config, identity, retry, cancel).await
    }

    /// Connect and register, retrying per `retry` until `cancel` turns `true`.
    pub async fn connect_with_cancel(
        config: ClientConfig,
        identity: AgentIdentity,
        retry: &RetryManager,
        cancel: watch::Receiver<bool>,
    ) -> Result<Self, WireError> {
        let (config_ref, identity_ref) = (&config, &identity);
        let outcome = retry
            .execute_with_cancel(move || Self::connect_once(config_ref, identity_ref), cancel)
            .await;
        match outcome {
            RetryOutcome::Success { result, attempts } => {
                info!(
                    identity = %result.identity.did(),
                    session = %result.session_id,
                    attempts,
                    "connected to gateway"
                );
                Ok(result)
            }
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => Err(WireError::RetriesExhausted {
                attempts,
                last_error: Box::new(last_error),
            }),
            RetryOutcome::Cancelled { .. } => Err(WireError::Cancelled),
        }
    }

    /// One connection attempt: TCP connect, answer the challenge, await
    /// `registered`.
    async fn connect_once(config: &ClientConfig, identity: &AgentIdentity) -> Result<Self, WireError> {
        debug!(addr = %config.addr, "connecting to gateway");
        let stream = TcpStream::connect(config.addr.as_str()).await?;
        let (mut reader, mut writer) = stream.into_split();

        let nonce = match read_frame(&mut reader, config.max_frame_bytes).await?.kind {
            WireFrameKind::Challenge { nonce } => nonce,
            WireFrameKind::Error { code, message } => {
                return Err(WireError::Rejected { code, message })
            }
            other => {
                return Err(WireError::HandshakeFailed(format!(
                    "Expected challenge, got {other:?}"
                )))
            }
        };

        let timestamp = now_millis();
        let public_key = identity.public_key_hex();
        let proof = registration_signing_bytes(identity.did(), &public_key, timestamp, &nonce);
        let register = WireFrame::new(WireFrameKind::Register {
            identity: identity.did().to_string(),
            public_key,
            capabilities: config.capabilities.clone(),
            timestamp,
            nonce,
            signature: sign_with(identity, config.shared_secret.as_deref(), &proof),
        });
        write_frame(&mut writer, &register).await?;

        let response = read_frame(&mut reader, config.max_frame_bytes).await?;
        match response.kind {
            WireFrameKind::Registered {
                session_id,
                gateway_identity,
                ..
            } => Ok(Self {
                identity: identity.clone(),
                config: config.clone(),
                reader,
                writer,
                session_id,
                gateway_identity,
                last_timestamp: timestamp,
                pending: VecDeque::new(),
            }),
            WireFrameKind::Error { code, message } => Err(WireError::Rejected { code, message }),
            other => Err(WireError::HandshakeFailed(format!(
                "Unexpected response to register: {other:?}"
            ))),
        }
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Identity the gateway signs its ERROR envelopes with.
    pub fn gateway_identity(&self) -> &str {
        &self.gateway_identity
    }

    /// Sign and send an envelope. Timestamps never go backwards.
    pub async fn send_signal(
        &mut self,
        kind: EnvelopeType,
        recipient: Option<&str>,
        payload: Value,
    ) -> Result<MessageEnvelope, WireError> {
        let timestamp = now_millis().max(self.last_timestamp);
        self.last_timestamp = timestamp;
        let mut envelope = MessageEnvelope::signed(
            &self.identity,
            kind,
            recipient.map(str::to_string),
            payload,
            timestamp,
        );
        if let Some(secret) = &self.config.shared_secret {
            envelope.signature = hmac_sign(secret, &envelope.signing_bytes());
        }
        self.send_envelope(&envelope).await?;
        Ok(envelope)
    }

    /// Send a recipient-less heartbeat.
    pub async fn heartbeat(&mut self) -> Result<(), WireError> {
        self.send_signal(EnvelopeType::Heartbeat, None, Value::Object(Default::default()))
            .await
            .map(|_| ())
    }

    /// Send an envelope exactly as given.
    pub async fn send_envelope(&mut self, envelope: &MessageEnvelope) -> Result<(), WireError> {
        self.send_frame(&WireFrame::signal(envelope.clone())).await
    }

    /// Send a raw frame.
    pub async fn send_frame(&mut self, frame: &WireFrame) -> Result<(), WireError> {
        write_frame(&mut self.writer, frame).await
    }

    /// Find agents advertising `capability`.
    pub async fn discover(&mut self, capability: &str) -> Result<Vec<AgentSummary>, WireError> {
        let request = WireFrame::new(WireFrameKind::Discover {
            capability: capability.to_string(),
        });
        let request_id = request.id.clone();
        self.send_frame(&request).await?;
        match self.await_reply(&request_id).await?.kind {
            WireFrameKind::DiscoverResult { agents } => Ok(agents),
            WireFrameKind::Error { code, message } => Err(WireError::Rejected { code, message }),
            other => Err(WireError::HandshakeFailed(format!(
                "Unexpected response to discover: {other:?}"
            ))),
        }
    }

    /// Ping the gateway and return its uptime in seconds.
    pub async fn ping(&mut self) -> Result<u64, WireError> {
        let request = WireFrame::new(WireFrameKind::Ping);
        let request_id = request.id.clone();
        self.send_frame(&request).await?;
        match self.await_reply(&request_id).await?.kind {
            WireFrameKind::Pong { uptime_secs } => Ok(uptime_secs),
            other => Err(WireError::HandshakeFailed(format!(
                "Unexpected response to ping: {other:?}"
            ))),
        }
    }

    /// Next frame from the gateway.
    pub async fn recv(&mut self) -> Result<WireFrame, WireError> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(frame);
        }
        read_frame(&mut self.reader, self.config.max_frame_bytes).await
    }

    /// Next signaling envelope, skipping any other frames.
    pub async fn recv_envelope(&mut self) -> Result<MessageEnvelope, WireError> {
        loop {
            match self.recv().await?.kind {
                WireFrameKind::Signal { envelope } => return Ok(envelope),
                other => debug!("skipping non-signal frame: {:?}", other),
            }
        }
    }

    /// Leave the gateway and close the connection.
    pub async fn unregister(mut self) -> Result<(), WireError> {
        self.send_frame(&WireFrame::new(WireFrameKind::Unregister))
            .await?;
        tokio::io::AsyncWriteExt::shutdown(&mut self.writer).await?;
        info!(identity = %self.identity.did(), "unregistered from gateway");
        Ok(())
    }

    /// Read until the reply to `request_id`, buffering anything else.
    async fn await_reply(&mut self, request_id: &str) -> Result<WireFrame, WireError> {
        loop {
            let frame = read_frame(&mut self.reader, self.config.max_frame_bytes).await?;
            if frame.id == request_id {
                return Ok(frame);
            }
            self.pending.push_back(frame);
        }
    }
}

fn sign_with(identity: &AgentIdentity, shared_secret: Option<&str>, data: &[u8]) -> String {
    match shared_secret {
        Some(secret) => hmac_sign(secret, data),
        None => identity.sign(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conexus_runtime::retry::{BackoffStrategy, RetryConfig};
    use std::time::Duration;

    fn quick_retry(max_retries: u32) -> RetryManager {
        RetryManager::new(RetryConfig {
            strategy: BackoffStrategy::Fixed,
            max_retries,
            initial_delay_ms: 10,
            backoff_multiplier: 1.0,
            jitter_ratio: 0.0,
            max_delay_ms: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_connect_refused_exhausts_retries() {
        // Bind then drop to get a port with nothing listening.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let err = GatewayClient::connect(
            ClientConfig::new(addr.to_string()),
            AgentIdentity::generate(),
            &quick_retry(2),
        )
        .await
        .unwrap_err();
        match err {
            WireError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("Expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_cancelled() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let retry = RetryManager::new(RetryConfig {
            strategy: BackoffStrategy::Fixed,
            max_retries: 100,
            initial_delay_ms: 60_000,
            backoff_multiplier: 1.0,
            jitter_ratio: 0.0,
            max_delay_ms: None,
        })
        .unwrap();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
        });
        let err = GatewayClient::connect_with_cancel(
            ClientConfig::new(addr.to_string()),
            AgentIdentity::generate(),
            &retry,
            rx,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WireError::Cancelled));
    }

    #[test]
    fn test_sign_with_shared_secret_is_hmac() {
        let identity = AgentIdentity::generate();
        let sig = sign_with(&identity, Some("k"), b"data");
        assert_eq!(sig, hmac_sign("k", b"data"));
        assert_ne!(sign_with(&identity, None, b"data"), sig);
    }
}
