//! Session Orchestrator
//!
//! Drives one accepted connection from negotiation to the end of its relay.
//! Nothing is relayed until every earlier step succeeded; on failure the
//! connections opened so far are dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::dialer::{DialError, Dialer};
use crate::config::{Config, Role};
use crate::metrics::{FailureKind, Metrics};
use crate::protocol::{ProtocolError, Socks5Handler, Socks5Reply, WireRequest};
use crate::relay::{RelayEngine, RelayOutcome, RelaySession};
use crate::transform::TransformConfig;
use crate::Result;

/// Per-listener session settings, shared by every connection it accepts
#[derive(Clone)]
pub struct SessionOrchestrator {
    role: Role,
    next_hop: Option<String>,
    transform: TransformConfig,
    dialer: Dialer,
    relay: RelayEngine,
    handshake_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl SessionOrchestrator {
    pub fn from_config(config: &Config) -> Self {
        Self {
            role: config.server.role,
            next_hop: config.server.remote_addr.clone(),
            transform: config.transform.clone(),
            dialer: Dialer::new(config.server.dial_timeout),
            relay: RelayEngine::new(config.server.buffer_size),
            handshake_timeout: config.server.handshake_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn transform(&self) -> &TransformConfig {
        &self.transform
    }

    /// Run the role's sequence over an accepted TCP connection
    pub async fn handle(&self, stream: TcpStream, peer: SocketAddr) -> Result<RelayOutcome> {
        match self.role {
            Role::Local => self.run_local(stream, peer).await,
            Role::Remote => self.run_remote(self.transform.wrap(stream), peer).await,
        }
    }

    /// Client-facing sequence: handshake, request, dial, reply, relay.
    ///
    /// With a next hop configured the dialed connection is transform-wrapped
    /// and receives the raw address message ahead of any pipelined bytes.
    /// Without one the destination is dialed directly.
    pub async fn run_local<S>(&self, stream: S, peer: SocketAddr) -> Result<RelayOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut handler = Socks5Handler::new(stream);

        let request = match timeout(self.handshake_timeout, negotiate(&mut handler)).await {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => {
                if let Some(code) = e.reply_code() {
                    let _ = handler.send_reply(Socks5Reply::error(code)).await;
                }
                return Err(e).context("SOCKS5 negotiation failed");
            }
            Err(elapsed) => {
                return Err(elapsed).with_context(|| {
                    format!("SOCKS5 negotiation timed out after {:?}", self.handshake_timeout)
                })
            }
        };

        let destination = request.address.dial_target();
        let dial_target = self.next_hop.as_deref().unwrap_or(&destination);

        let (remote, resolved) = match self.dialer.dial(dial_target).await {
            Ok(connected) => connected,
            Err(e) => {
                let _ = handler.send_reply(Socks5Reply::error(e.reply_code())).await;
                return Err(e).with_context(|| format!("Failed to connect to {}", dial_target));
            }
        };
        info!(target = %destination, via = %resolved, "Connected");

        handler
            .send_reply(Socks5Reply::success())
            .await
            .context("Failed to send SOCKS5 reply")?;
        let client = handler.into_inner();
        let session = Arc::new(RelaySession::new(peer, &destination));

        match &self.next_hop {
            Some(_) => {
                let mut remote = self.transform.wrap(remote);
                let mut preamble = BytesMut::with_capacity(request.raw.len() + request.extra.len());
                preamble.extend_from_slice(&request.raw);
                preamble.extend_from_slice(&request.extra);
                write_preamble(&mut remote, &preamble)
                    .await
                    .context("Failed to send tunnel request")?;
                session.add_bytes_up(request.extra.len() as u64);
                Ok(self.relay_and_record(session, client, remote).await)
            }
            None => {
                let mut remote = remote;
                write_preamble(&mut remote, &request.extra)
                    .await
                    .context("Failed to forward pipelined data")?;
                session.add_bytes_up(request.extra.len() as u64);
                Ok(self.relay_and_record(session, client, remote).await)
            }
        }
    }

    /// Tunnel-facing sequence over an already transform-wrapped connection:
    /// address message, dial, pipelined bytes, relay.
    pub async fn run_remote<S>(&self, stream: S, peer: SocketAddr) -> Result<RelayOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut handler = Socks5Handler::new(stream);

        let request = match timeout(self.handshake_timeout, handler.read_tunnel_request()).await {
            Ok(request) => request.context("Tunnel request failed")?,
            Err(elapsed) => {
                return Err(elapsed).with_context(|| {
                    format!("Tunnel request timed out after {:?}", self.handshake_timeout)
                })
            }
        };

        let destination = request.address.dial_target();
        let (mut remote, resolved) = self
            .dialer
            .dial(&destination)
            .await
            .with_context(|| format!("Failed to connect to {}", destination))?;
        info!(target = %destination, via = %resolved, "Connected");

        let session = Arc::new(RelaySession::new(peer, &destination));
        write_preamble(&mut remote, &request.extra)
            .await
            .context("Failed to forward pipelined data")?;
        session.add_bytes_up(request.extra.len() as u64);

        Ok(self
            .relay_and_record(session, handler.into_inner(), remote)
            .await)
    }

    async fn relay_and_record<C, R>(
        &self,
        session: Arc<RelaySession>,
        client: C,
        remote: R,
    ) -> RelayOutcome
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        R: AsyncRead + AsyncWrite + Send + 'static,
    {
        let outcome = self.relay.relay(session, client, remote).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_relay(&outcome.stats);
            if outcome.failure().is_some() {
                metrics.record_failure(FailureKind::Relay);
            }
        }
        outcome
    }
}

async fn negotiate<S>(handler: &mut Socks5Handler<S>) -> std::result::Result<WireRequest, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    handler.handle_handshake().await?;
    handler.read_request().await
}

async fn write_preamble<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if bytes.is_empty() {
        return Ok(());
    }
    debug!("Writing {} bytes ahead of the relay", bytes.len());
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// How a session-level error should be reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The peer broke the wire protocol
    Violation(FailureKind),
    /// Dial, timeout or other I/O failure
    Transport(FailureKind),
    /// Peer went away before sending anything
    Expected,
}

/// Classify an error returned by [`SessionOrchestrator::handle`]
pub fn classify(err: &anyhow::Error) -> ErrorClass {
    if let Some(e) = err.downcast_ref::<ProtocolError>() {
        return match e {
            ProtocolError::IncompleteRead { received: 0, .. } => ErrorClass::Expected,
            e if e.is_violation() => ErrorClass::Violation(FailureKind::Protocol),
            _ => ErrorClass::Transport(FailureKind::Transport),
        };
    }
    if err.downcast_ref::<DialError>().is_some() {
        return ErrorClass::Transport(FailureKind::Dial);
    }
    if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return ErrorClass::Transport(FailureKind::Timeout);
    }
    ErrorClass::Transport(FailureKind::Transport)
}
