//! Per-connection read/acknowledge loop.
//!
//! A session owns its stream for its whole life. It reads frames until the
//! peer closes, sends the disconnect sentinel, breaks the protocol, or the
//! dispatcher signals a forced disconnect. The stream is dropped (closed) on
//! every one of those paths when `run` returns.

use crate::config::ProtocolConfig;
use crate::protocol::{read_header, read_payload, write_ack};
use crate::{HlpcError, Result};
use std::future::Future;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Where a session is in its read/ack cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHeader,
    AwaitingPayload { len: usize },
    AckSent,
    Closed,
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Peer closed the socket between frames.
    PeerClosed,
    /// Peer sent the disconnect sentinel.
    Disconnected,
    /// The dispatcher told every session to close (outage or shutdown).
    ForcedDisconnect,
    /// Framing or I/O error. Terminal to this session only.
    Failed(HlpcError),
}

/// Summary returned when a session finishes.
#[derive(Debug)]
pub struct SessionReport {
    pub remote_addr: SocketAddr,
    pub outcome: SessionOutcome,
    pub messages_acked: usize,
}

/// One accepted connection.
pub struct Session<S> {
    remote_addr: SocketAddr,
    stream: S,
    connected: bool,
    state: SessionState,
    messages_acked: usize,
}

/// What happened while waiting on a read.
enum ReadEvent<T> {
    Done(Result<T>),
    Signalled,
}

/// Race `read` against the disconnect signal. A pending signal wins over data
/// that is already waiting.
async fn read_or_signal<T>(
    disconnect_rx: &mut watch::Receiver<u64>,
    read: impl Future<Output = Result<T>>,
) -> ReadEvent<T> {
    tokio::select! {
        biased;
        _ = disconnect_rx.changed() => ReadEvent::Signalled,
        result = read => ReadEvent::Done(result),
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            stream,
            connected: true,
            state: SessionState::AwaitingHeader,
            messages_acked: 0,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion.
    ///
    /// `disconnect_rx` fires when the dispatcher wants every session closed.
    /// Only changes made after this call count.
    pub async fn run(mut self, mut disconnect_rx: watch::Receiver<u64>) -> SessionReport {
        disconnect_rx.borrow_and_update();
        info!("New connection from {}", self.remote_addr);

        let outcome = loop {
            match self.step(&mut disconnect_rx).await {
                Ok(None) => continue,
                Ok(Some(outcome)) => break outcome,
                Err(e) => {
                    warn!("Connection {} ended abruptly: {}", self.remote_addr, e);
                    break SessionOutcome::Failed(e);
                }
            }
        };

        self.connected = false;
        self.state = SessionState::Closed;
        info!("Closing connection to {}", self.remote_addr);

        SessionReport {
            remote_addr: self.remote_addr,
            outcome,
            messages_acked: self.messages_acked,
        }
    }

    /// Process one frame. Returns `Some` once the session should close.
    async fn step(
        &mut self,
        disconnect_rx: &mut watch::Receiver<u64>,
    ) -> Result<Option<SessionOutcome>> {
        self.state = SessionState::AwaitingHeader;

        let len = match read_or_signal(disconnect_rx, read_header(&mut self.stream)).await {
            ReadEvent::Signalled => return Ok(Some(self.forced_disconnect())),
            ReadEvent::Done(header) => match header? {
                Some(len) => len,
                None => return Ok(Some(SessionOutcome::PeerClosed)),
            },
        };

        self.state = SessionState::AwaitingPayload { len };
        let message = match read_or_signal(disconnect_rx, read_payload(&mut self.stream, len)).await
        {
            ReadEvent::Signalled => return Ok(Some(self.forced_disconnect())),
            ReadEvent::Done(message) => message?,
        };

        if message == ProtocolConfig::DISCONNECT_MESSAGE {
            self.connected = false;
        }

        info!("{} sent {}", self.remote_addr, message);

        write_ack(&mut self.stream).await?;
        self.messages_acked += 1;
        self.state = SessionState::AckSent;
        debug!("Acknowledged message {} from {}", self.messages_acked, self.remote_addr);

        if self.connected {
            Ok(None)
        } else {
            Ok(Some(SessionOutcome::Disconnected))
        }
    }

    fn forced_disconnect(&self) -> SessionOutcome {
        info!("Forcing disconnect of {}", self.remote_addr);
        SessionOutcome::ForcedDisconnect
    }
}
