//! TCP client for an HLPC server.
//!
//! Sends framed messages and reads the fixed acknowledgement that follows
//! each one. Used by the `hlpc-agent` binary.

use crate::config::ProtocolConfig;
use crate::protocol::{read_ack, write_frame};
use crate::{HlpcError, Result};
use std::net::SocketAddr;
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

/// Client connected to a running server.
#[derive(Debug)]
pub struct HlpcClient {
    stream: TcpStream,
    addr: SocketAddr,
    sent: usize,
}

impl HlpcClient {
    /// Connect to a server.
    ///
    /// Uses the connection timeout from `ProtocolConfig`.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = tokio::time::timeout(ProtocolConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                HlpcError::from(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "connect timed out after {:?}",
                        ProtocolConfig::CONNECT_TIMEOUT
                    ),
                ))
            })??;
        let addr = stream.peer_addr()?;

        debug!("Connected to HLPC server at {}", addr);

        Ok(Self {
            stream,
            addr,
            sent: 0,
        })
    }

    /// Send one message and wait for its acknowledgement.
    pub async fn send(&mut self, message: &str) -> Result<String> {
        write_frame(&mut self.stream, message).await?;
        let ack = read_ack(&mut self.stream).await?;
        self.sent += 1;
        Ok(ack)
    }

    /// Send the disconnect sentinel, read the final acknowledgement and close.
    pub async fn disconnect(mut self) -> Result<String> {
        let ack = self.send(ProtocolConfig::DISCONNECT_MESSAGE).await?;
        debug!("Disconnected from {} after {} messages", self.addr, self.sent);
        Ok(ack)
    }

    /// Address of the server.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Local address of this connection, as the server sees it.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Messages acknowledged so far.
    pub fn sent(&self) -> usize {
        self.sent
    }
}
