//! Relay Engine
//!
//! Copies bytes in both directions between two connections. Each direction
//! runs as its own task; the first one to end raises a per-session close
//! signal so the other stops at its next pending read or write.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::session::{RelaySession, SessionStats};

/// Default copy chunk size
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Upper bound on draining a destination writer once its direction ended
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("write of {attempted} bytes made no progress")]
    PartialWrite { attempted: usize },

    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),
}

impl RelayError {
    /// True when the error is what a connection closed on our side looks like
    pub fn is_expected(&self) -> bool {
        match self {
            RelayError::PartialWrite { .. } => false,
            RelayError::Read(e) | RelayError::Write(e) => matches!(
                e.kind(),
                io::ErrorKind::NotConnected
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
        }
    }
}

/// How one copy direction finished
#[derive(Debug)]
pub enum DirectionEnd {
    /// Source reached end of stream
    Eof,
    /// The other direction ended first
    Closed,
    Failed(RelayError),
}

impl DirectionEnd {
    pub fn is_expected(&self) -> bool {
        match self {
            DirectionEnd::Eof | DirectionEnd::Closed => true,
            DirectionEnd::Failed(e) => e.is_expected(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Client side to remote side
    Up,
    /// Remote side to client side
    Down,
}

impl Flow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flow::Up => "up",
            Flow::Down => "down",
        }
    }
}

/// Result of a finished relay
#[derive(Debug)]
pub struct RelayOutcome {
    pub stats: SessionStats,
    pub up: DirectionEnd,
    pub down: DirectionEnd,
}

impl RelayOutcome {
    /// First unexpected failure, if any
    pub fn failure(&self) -> Option<&RelayError> {
        [&self.up, &self.down].into_iter().find_map(|end| match end {
            DirectionEnd::Failed(e) if !e.is_expected() => Some(e),
            _ => None,
        })
    }
}

/// Shared close flag for the two directions of one session
#[derive(Debug, Clone)]
struct CloseSignal(Arc<watch::Sender<bool>>);

impl CloseSignal {
    fn new() -> Self {
        Self(Arc::new(watch::Sender::new(false)))
    }

    fn raise(&self) {
        self.0.send_replace(true);
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }
}

#[derive(Debug, Clone)]
pub struct RelayEngine {
    buffer_size: usize,
}

impl Default for RelayEngine {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl RelayEngine {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Relay between the client-side connection `client` and the remote-side
    /// connection `remote` until both directions have finished.
    ///
    /// Both connections are dropped, and so closed, before this returns.
    pub async fn relay<C, R>(
        &self,
        session: Arc<RelaySession>,
        client: C,
        remote: R,
    ) -> RelayOutcome
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
        R: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (client_read, client_write) = tokio::io::split(client);
        let (remote_read, remote_write) = tokio::io::split(remote);
        let close = CloseSignal::new();

        debug!(session_id = %session.session_id, "Starting bidirectional relay");

        let up = tokio::spawn(copy_direction(
            client_read,
            remote_write,
            self.buffer_size,
            close.clone(),
            session.clone(),
            Flow::Up,
        ));
        let down = tokio::spawn(copy_direction(
            remote_read,
            client_write,
            self.buffer_size,
            close,
            session.clone(),
            Flow::Down,
        ));

        // completion barrier: the halves live until both tasks are done
        let (up, down) = tokio::join!(up, down);
        let up = joined(up, &session, Flow::Up);
        let down = joined(down, &session, Flow::Down);

        session.log_stats();
        RelayOutcome {
            stats: session.to_stats(),
            up,
            down,
        }
    }
}

fn joined<R, W>(
    result: Result<(DirectionEnd, R, W), tokio::task::JoinError>,
    session: &RelaySession,
    flow: Flow,
) -> DirectionEnd {
    match result {
        Ok((end, _reader, _writer)) => end,
        Err(e) => {
            warn!(
                session_id = %session.session_id,
                direction = flow.as_str(),
                "Relay task aborted: {}", e
            );
            DirectionEnd::Failed(RelayError::Read(io::Error::new(io::ErrorKind::Other, e)))
        }
    }
}

async fn write_chunk<W>(writer: &mut W, chunk: &[u8]) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(chunk).await.map_err(|e| {
        if e.kind() == io::ErrorKind::WriteZero {
            RelayError::PartialWrite {
                attempted: chunk.len(),
            }
        } else {
            RelayError::Write(e)
        }
    })?;
    writer.flush().await.map_err(RelayError::Write)
}

async fn copy_direction<R, W>(
    mut reader: R,
    mut writer: W,
    buffer_size: usize,
    close: CloseSignal,
    session: Arc<RelaySession>,
    flow: Flow,
) -> (DirectionEnd, R, W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut closed = close.subscribe();
    let mut buf = vec![0u8; buffer_size];

    let end = loop {
        let n = tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => break DirectionEnd::Closed,
            res = reader.read(&mut buf) => match res {
                Ok(0) => break DirectionEnd::Eof,
                Ok(n) => n,
                Err(e) => break DirectionEnd::Failed(RelayError::Read(e)),
            },
        };

        let written = tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => break DirectionEnd::Closed,
            res = write_chunk(&mut writer, &buf[..n]) => res,
        };
        if let Err(e) = written {
            break DirectionEnd::Failed(e);
        }

        match flow {
            Flow::Up => session.add_bytes_up(n as u64),
            Flow::Down => session.add_bytes_down(n as u64),
        }
    };

    close.raise();
    if let Ok(Err(e)) = timeout(SHUTDOWN_GRACE, writer.shutdown()).await {
        debug!(session_id = %session.session_id, direction = flow.as_str(), "Shutdown failed: {}", e);
    }

    match &end {
        DirectionEnd::Failed(e) if !e.is_expected() => warn!(
            session_id = %session.session_id,
            direction = flow.as_str(),
            "Relay direction failed: {}", e
        ),
        _ => debug!(
            session_id = %session.session_id,
            direction = flow.as_str(),
            "Relay direction ended: {:?}", end
        ),
    }

    (end, reader, writer)
}
