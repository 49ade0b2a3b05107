//! GatewayNode: TCP listener for the Conexus signaling protocol.
//!
//! A [`GatewayNode`] binds a local TCP listener and accepts agent
//! connections. Each connection is sent a challenge nonce and must answer
//! with a register frame whose proof covers it, within the handshake
//! timeout. After that it gets a reader task (this connection's frames, in
//! arrival order) and a writer task that drains the connection's outbound
//! queue.
//!
//! Closing a connection unregisters its session. Releasing the session's
//! handle from the registry (unregister, eviction, shutdown) closes the
//! connection.

use crate::error::WireError;
use crate::message::*;
use crate::registry::{AgentRegistry, ConnectionEndpoint, ConnectionHandle};
use crate::router::MessageRouter;

use conexus_types::config::GatewayConfig;
use conexus_types::envelope::{now_millis, ErrorCode, MessageEnvelope};
use conexus_types::error::RegistryError;
use conexus_types::identity::{registration_signing_bytes, AgentIdentity};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWrite;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// The gateway's network endpoint.
pub struct GatewayNode {
    config: GatewayConfig,
    registry: AgentRegistry,
    router: Arc<MessageRouter>,
    identity: AgentIdentity,
    /// Actual bound address (useful when binding to port 0).
    local_addr: SocketAddr,
    start_time: Instant,
}

/// Per-connection state after a successful registration.
struct Session {
    identity: String,
    session_id: String,
    addr: SocketAddr,
}

/// What the frame loop does after handling one frame.
enum FrameAction {
    Reply(WireFrame),
    Continue,
    Close,
}

impl GatewayNode {
    /// Bind the configured address and start accepting connections.
    ///
    /// The accept loop and every connection stop when `shutdown` turns `true`.
    pub async fn start(
        config: GatewayConfig,
        router: Arc<MessageRouter>,
        identity: AgentIdentity,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Arc<Self>, tokio::task::JoinHandle<()>), WireError> {
        let listener = TcpListener::bind(config.listen_addr.as_str()).await?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            gateway = %identity.did(),
            verifier = router.verifier().name(),
            "gateway listening"
        );

        let node = Arc::new(Self {
            registry: router.registry().clone(),
            config,
            router,
            identity,
            local_addr,
            start_time: Instant::now(),
        });

        let node_clone = Arc::clone(&node);
        let accept_handle = tokio::spawn(async move {
            Self::accept_loop(listener, node_clone, shutdown).await;
        });

        Ok((node, accept_handle))
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The identity that signs gateway-originated envelopes.
    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    async fn accept_loop(
        listener: TcpListener,
        node: Arc<GatewayNode>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "accepted connection");
                        let node = Arc::clone(&node);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = node.handle_inbound(stream, addr, shutdown).await {
                                debug!(%addr, "connection ended: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("accept error: {}", e);
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                },
                _ = signalled(&mut shutdown) => {
                    info!("gateway listener stopping");
                    break;
                }
            }
        }
    }

    /// Handle a single inbound connection: registration, then the frame loop.
    async fn handle_inbound(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), WireError> {
        let (mut reader, mut writer) = stream.into_split();

        let Some((session, endpoint)) = self
            .register_connection(&mut reader, &mut writer, addr, &mut shutdown)
            .await?
        else {
            return Ok(());
        };

        let ConnectionEndpoint {
            outbound,
            replies,
            closed,
        } = endpoint;
        let writer_task = tokio::spawn(writer_loop(writer, outbound, closed.clone()));

        let result = self
            .connection_loop(&mut reader, &session, &replies, closed, shutdown)
            .await;

        self.registry
            .unregister_session(&session.identity, &session.session_id);
        drop(replies);
        let _ = writer_task.await;

        info!(identity = %session.identity, addr = %session.addr, "connection closed");
        result
    }

    /// Issue the challenge, then read and validate the registration frame.
    ///
    /// Returns `None` after answering a rejected registration, on handshake
    /// timeout, or when shutdown arrives first.
    async fn register_connection(
        &self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        addr: SocketAddr,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<(Session, ConnectionEndpoint)>, WireError> {
        let issued = uuid::Uuid::new_v4().to_string();
        let challenge = WireFrame::new(WireFrameKind::Challenge {
            nonce: issued.clone(),
        });
        write_frame(writer, &challenge).await?;

        let first = tokio::time::timeout(
            self.config.handshake_timeout(),
            read_frame_body(reader, self.config.max_frame_bytes),
        );
        let body = tokio::select! {
            biased;
            _ = signalled(shutdown) => {
                debug!(%addr, "shutdown before registration");
                return Ok(None);
            }
            body = first => match body {
                Ok(body) => body?,
                Err(_) => {
                    warn!(%addr, "no registration within handshake timeout");
                    let resp = WireFrame::error(
                        "",
                        codes::HANDSHAKE_TIMEOUT,
                        "Registration timed out",
                    );
                    write_frame(writer, &resp).await?;
                    return Ok(None);
                }
            },
        };
        let msg = match decode_frame(&body) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(%addr, "rejected malformed first frame: {}", e);
                let resp = WireFrame::error(
                    "",
                    codes::REGISTRATION_REQUIRED,
                    "Registration required: first frame must be register",
                );
                write_frame(writer, &resp).await?;
                return Ok(None);
            }
        };

        let WireFrameKind::Register {
            identity,
            public_key,
            capabilities,
            timestamp,
            nonce,
            signature,
        } = msg.kind
        else {
            warn!(%addr, "rejected unregistered frame, registration required");
            let resp = WireFrame::error(
                &msg.id,
                codes::REGISTRATION_REQUIRED,
                "Registration required: first frame must be register",
            );
            write_frame(writer, &resp).await?;
            return Ok(None);
        };

        // A proof over any other nonce was captured from another connection.
        let proof = registration_signing_bytes(&identity, &public_key, timestamp, &issued);
        if nonce != issued
            || !self
                .router
                .verifier()
                .verify(&proof, &identity, &public_key, &signature)
        {
            warn!(%addr, identity = %identity, "registration proof failed");
            let resp = WireFrame::error(
                &msg.id,
                codes::PROOF_FAILED,
                "Registration signature verification failed",
            );
            write_frame(writer, &resp).await?;
            return Ok(None);
        }

        let (handle, endpoint) = ConnectionHandle::channel(self.config.outbound_queue_depth);
        let record = match self.registry.register_at(
            &identity,
            &public_key,
            capabilities,
            handle,
            timestamp,
        ) {
            Ok(record) => record,
            Err(e) => {
                let code = match &e {
                    RegistryError::DuplicateIdentity(_) => codes::DUPLICATE_IDENTITY,
                    RegistryError::RegistryFull { .. } => codes::REGISTRY_FULL,
                    RegistryError::UnknownAgent(_) => codes::INTERNAL,
                };
                warn!(%addr, identity = %identity, "registration rejected: {}", e);
                write_frame(writer, &WireFrame::error(&msg.id, code, e.to_string())).await?;
                return Ok(None);
            }
        };

        let ack = WireFrame::reply(
            &msg.id,
            WireFrameKind::Registered {
                identity: record.identity.clone(),
                session_id: record.session_id.clone(),
                gateway_identity: self.identity.did().to_string(),
            },
        );
        if let Err(e) = write_frame(writer, &ack).await {
            self.registry
                .unregister_session(&record.identity, &record.session_id);
            return Err(e);
        }

        info!(
            identity = %record.identity,
            session = %record.session_id,
            %addr,
            capabilities = record.capabilities.len(),
            "registration complete"
        );

        Ok(Some((
            Session {
                identity: record.identity,
                session_id: record.session_id,
                addr,
            },
            endpoint,
        )))
    }

    /// Frame loop for a registered connection.
    async fn connection_loop(
        &self,
        reader: &mut OwnedReadHalf,
        session: &Session,
        replies: &mpsc::Sender<WireFrame>,
        mut closed: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), WireError> {
        loop {
            let body = tokio::select! {
                biased;
                _ = signalled(&mut closed) => {
                    debug!(identity = %session.identity, "session released by registry");
                    return Ok(());
                }
                _ = signalled(&mut shutdown) => return Ok(()),
                body = read_frame_body(reader, self.config.max_frame_bytes) => body,
            };

            let body = match body {
                Ok(body) => body,
                Err(WireError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e),
            };
            // Any complete frame counts as liveness, even one that is rejected.
            let _ = self
                .registry
                .touch_session(&session.identity, &session.session_id);

            let frame = match decode_frame(&body) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(identity = %session.identity, "malformed frame: {}", e);
                    let resp = WireFrame::error("", codes::MALFORMED, format!("Malformed frame: {e}"));
                    if replies.send(resp).await.is_err() {
                        return Ok(());
                    }
                    continue;
                }
            };

            match self.handle_frame(frame, session) {
                FrameAction::Reply(resp) => {
                    if replies.send(resp).await.is_err() {
                        return Ok(());
                    }
                }
                FrameAction::Continue => {}
                FrameAction::Close => return Ok(()),
            }
        }
    }

    fn handle_frame(&self, frame: WireFrame, session: &Session) -> FrameAction {
        match frame.kind {
            WireFrameKind::Signal { envelope } => match self.handle_signal(envelope, session) {
                Some(reply) => FrameAction::Reply(reply),
                None => FrameAction::Continue,
            },
            WireFrameKind::Ping => FrameAction::Reply(WireFrame::reply(
                &frame.id,
                WireFrameKind::Pong {
                    uptime_secs: self.uptime_secs(),
                },
            )),
            WireFrameKind::Discover { capability } => {
                let agents = self
                    .registry
                    .find_by_capability(&capability)
                    .into_iter()
                    .filter(|r| r.identity != session.identity)
                    .map(|r| r.summary())
                    .collect();
                FrameAction::Reply(WireFrame::reply(
                    &frame.id,
                    WireFrameKind::DiscoverResult { agents },
                ))
            }
            WireFrameKind::Unregister => {
                info!(identity = %session.identity, "agent unregistering");
                FrameAction::Close
            }
            WireFrameKind::Register { .. } => FrameAction::Reply(WireFrame::error(
                &frame.id,
                codes::MALFORMED,
                "Already registered",
            )),
            other => {
                warn!(
                    identity = %session.identity,
                    "unexpected frame from agent: {:?}", other
                );
                FrameAction::Continue
            }
        }
    }

    fn handle_signal(&self, envelope: MessageEnvelope, session: &Session) -> Option<WireFrame> {
        if envelope.sender != session.identity {
            warn!(
                identity = %session.identity,
                claimed = %envelope.sender,
                "envelope sender does not match connection"
            );
            return Some(self.error_envelope(
                &envelope,
                &session.identity,
                ErrorCode::SenderMismatch,
                "envelope sender does not match the registered identity",
            ));
        }

        let outcome = self.router.route(&envelope);
        match outcome.error_code() {
            Some(code) if self.config.notify_undeliverable => Some(self.error_envelope(
                &envelope,
                &session.identity,
                code,
                outcome.describe(),
            )),
            Some(_) => {
                debug!(id = %envelope.id, ?outcome, "undeliverable envelope dropped");
                None
            }
            None => None,
        }
    }

    /// A signed ERROR envelope for `failed`, addressed to the connection.
    fn error_envelope(
        &self,
        failed: &MessageEnvelope,
        connection_identity: &str,
        code: ErrorCode,
        message: &str,
    ) -> WireFrame {
        let mut reply = MessageEnvelope::error_reply(&self.identity, failed, code, message, now_millis());
        reply.recipient = Some(connection_identity.to_string());
        WireFrame::signal(reply)
    }
}

/// Drain the outbound queue onto the socket until the session is released
/// or every sender is gone.
async fn writer_loop<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<WireFrame>,
    mut closed: watch::Receiver<bool>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = signalled(&mut closed) => break,
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        debug!("write failed: {}", e);
                        break;
                    }
                }
                None => break,
            },
        }
    }
    let _ = tokio::io::AsyncWriteExt::shutdown(&mut writer).await;
}

/// Resolve once the flag turns `true` or its sender is dropped.
async fn signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::Ed25519Verifier;
    use std::time::Duration;

    async fn start_gateway_with(config: GatewayConfig) -> (Arc<GatewayNode>, watch::Sender<bool>) {
        let config = GatewayConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            ..config
        };
        let registry = AgentRegistry::new(config.max_agents);
        let router = Arc::new(MessageRouter::new(registry, Arc::new(Ed25519Verifier)));
        let (tx, rx) = watch::channel(false);
        let (node, _task) = GatewayNode::start(config, router, AgentIdentity::generate(), rx)
            .await
            .unwrap();
        (node, tx)
    }

    async fn start_gateway() -> (Arc<GatewayNode>, watch::Sender<bool>) {
        start_gateway_with(GatewayConfig::default()).await
    }

    /// Connect and consume the challenge, returning its nonce.
    async fn connect(node: &GatewayNode) -> (OwnedReadHalf, OwnedWriteHalf, String) {
        let stream = TcpStream::connect(node.local_addr()).await.unwrap();
        let (mut reader, writer) = stream.into_split();
        match read_frame(&mut reader, 1024 * 1024).await.unwrap().kind {
            WireFrameKind::Challenge { nonce } => (reader, writer, nonce),
            other => panic!("Expected Challenge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_challenge_nonce_unique_per_connection() {
        let (node, _shutdown) = start_gateway().await;
        let (_r1, _w1, first) = connect(&node).await;
        let (_r2, _w2, second) = connect(&node).await;
        assert!(!first.is_empty());
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_ping_before_register_rejected() {
        let (node, _shutdown) = start_gateway().await;
        let (mut reader, mut writer, _nonce) = connect(&node).await;

        let ping = WireFrame::reply("ping-1", WireFrameKind::Ping);
        write_frame(&mut writer, &ping).await.unwrap();

        let response = read_frame(&mut reader, 1024 * 1024).await.unwrap();
        assert_eq!(response.id, "ping-1");
        match response.kind {
            WireFrameKind::Error { code, message } => {
                assert_eq!(code, 401);
                assert!(message.contains("Registration required"), "got: {message}");
            }
            other => panic!("Expected Error(401), got {other:?}"),
        }
        // Connection is closed afterwards.
        assert!(matches!(
            read_frame(&mut reader, 1024).await,
            Err(WireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_bad_registration_proof_rejected() {
        let (node, _shutdown) = start_gateway().await;
        let agent = AgentIdentity::generate();
        let (mut reader, mut writer, nonce) = connect(&node).await;

        let frame = WireFrame::new(WireFrameKind::Register {
            identity: agent.did().to_string(),
            public_key: agent.public_key_hex(),
            capabilities: Vec::new(),
            timestamp: 1,
            nonce,
            signature: agent.sign(b"something else"),
        });
        write_frame(&mut writer, &frame).await.unwrap();

        match read_frame(&mut reader, 1024 * 1024).await.unwrap().kind {
            WireFrameKind::Error { code, .. } => assert_eq!(code, 403),
            other => panic!("Expected Error(403), got {other:?}"),
        }
        assert_eq!(node.registry().active_count(), 0);
    }

    #[tokio::test]
    async fn test_proof_over_foreign_nonce_rejected() {
        let (node, _shutdown) = start_gateway().await;
        let agent = AgentIdentity::generate();
        let (mut reader, mut writer, _nonce) = connect(&node).await;

        // Correctly signed, but for a challenge this connection never got.
        let public_key = agent.public_key_hex();
        let proof = registration_signing_bytes(agent.did(), &public_key, 1, "other-nonce");
        let frame = WireFrame::new(WireFrameKind::Register {
            identity: agent.did().to_string(),
            public_key,
            capabilities: Vec::new(),
            timestamp: 1,
            nonce: "other-nonce".to_string(),
            signature: agent.sign(&proof),
        });
        write_frame(&mut writer, &frame).await.unwrap();

        match read_frame(&mut reader, 1024 * 1024).await.unwrap().kind {
            WireFrameKind::Error { code, .. } => assert_eq!(code, codes::PROOF_FAILED),
            other => panic!("Expected Error(403), got {other:?}"),
        }
        assert_eq!(node.registry().active_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_unregistered_connection() {
        let (node, shutdown) = start_gateway().await;
        let (mut reader, _writer, _nonce) = connect(&node).await;

        shutdown.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut reader, 1024))
            .await
            .expect("idle connection should close on shutdown");
        assert!(matches!(result, Err(WireError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_silent_connection_times_out() {
        let (node, _shutdown) = start_gateway_with(GatewayConfig {
            handshake_timeout_secs: 1,
            ..Default::default()
        })
        .await;
        let (mut reader, _writer, _nonce) = connect(&node).await;

        let frame = tokio::time::timeout(Duration::from_secs(3), read_frame(&mut reader, 1024))
            .await
            .expect("gateway should give up on a silent connection")
            .unwrap();
        match frame.kind {
            WireFrameKind::Error { code, .. } => assert_eq!(code, codes::HANDSHAKE_TIMEOUT),
            other => panic!("Expected Error(408), got {other:?}"),
        }
        assert!(matches!(
            read_frame(&mut reader, 1024).await,
            Err(WireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_stops_listener() {
        let (node, shutdown) = start_gateway().await;
        let addr = node.local_addr();
        shutdown.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
