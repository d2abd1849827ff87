//! TCP listener and session dispatcher.
//!
//! Binds the configured address, accepts connections and runs each one as a
//! `Session` in its own task. Session tasks live in a `JoinSet` owned by the
//! accept loop, so the dispatcher can signal, join and abort them.
//!
//! # Thread Safety
//!
//! The accept loop and every session run on the tokio runtime. Sessions share
//! no state with each other; the active-session count is an atomic and the
//! forced-disconnect signal is a `watch` channel.

use crate::config::LifecycleConfig;
use crate::session::{Session, SessionOutcome, SessionReport};
use crate::{HlpcError, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Handle to a running server. Dropping it aborts the accept loop.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    disconnect_tx: Arc<watch::Sender<u64>>,
    active_sessions: Arc<AtomicUsize>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of sessions currently connected.
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// Tell every connected session to close. The listener keeps accepting.
    ///
    /// Returns how many sessions were connected when the signal went out.
    pub fn disconnect_all(&self) -> usize {
        let active = self.active_sessions();
        self.disconnect_tx.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
        active
    }

    /// Stop accepting, close every session and wait for the accept loop.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                error!("Accept loop ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Decrements the active count when a session task ends, even if aborted.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A bound listener that has not started accepting yet.
pub struct HlpcServer {
    listener: TcpListener,
    addr: SocketAddr,
    max_sessions: usize,
}

impl HlpcServer {
    /// Bind to `host:port`.
    ///
    /// An invalid address or one already in use is a `Bind` error; the caller
    /// must abort startup.
    pub async fn bind(host: &str, port: u16, max_sessions: usize) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        info!("Attempting to bind to {} on port {}", host, port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| HlpcError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener
            .local_addr()
            .map_err(|source| HlpcError::Bind { addr, source })?;

        info!("HLPC server is listening on {}", local);

        Ok(Self {
            listener,
            addr: local,
            max_sessions: max_sessions.max(1),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Start the accept loop in a background task.
    pub fn start(self) -> ServerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (disconnect_tx, disconnect_rx) = watch::channel(0u64);
        let disconnect_tx = Arc::new(disconnect_tx);
        let active_sessions = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            self.listener,
            self.max_sessions,
            shutdown_rx,
            disconnect_tx.clone(),
            disconnect_rx,
            active_sessions.clone(),
        ));

        ServerHandle {
            addr: self.addr,
            shutdown_tx: Some(shutdown_tx),
            disconnect_tx,
            active_sessions,
            task_handle: Some(task_handle),
        }
    }

    async fn accept_loop(
        listener: TcpListener,
        max_sessions: usize,
        mut shutdown_rx: oneshot::Receiver<()>,
        disconnect_tx: Arc<watch::Sender<u64>>,
        disconnect_rx: watch::Receiver<u64>,
        active_sessions: Arc<AtomicUsize>,
    ) {
        let mut sessions: JoinSet<SessionReport> = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("HLPC server shutting down");
                    break;
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    Self::reap(joined);
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_sessions.load(Ordering::SeqCst);
                            if current >= max_sessions {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer_addr, max_sessions
                                );
                                continue;
                            }

                            active_sessions.fetch_add(1, Ordering::SeqCst);
                            let guard = ActiveGuard(active_sessions.clone());
                            let rx = disconnect_rx.clone();

                            sessions.spawn(async move {
                                let _guard = guard;
                                Session::new(stream, peer_addr).run(rx).await
                            });

                            info!(
                                "Active client connections = {}",
                                active_sessions.load(Ordering::SeqCst)
                            );
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }

        drop(listener);
        Self::close_sessions(&mut sessions, &disconnect_tx).await;
    }

    /// Ask sessions to close, give them a grace period, then abort the rest.
    async fn close_sessions(
        sessions: &mut JoinSet<SessionReport>,
        disconnect_tx: &watch::Sender<u64>,
    ) {
        if sessions.is_empty() {
            return;
        }

        info!("Closing {} active client connections", sessions.len());
        disconnect_tx.send_modify(|epoch| *epoch = epoch.wrapping_add(1));

        let drained = tokio::time::timeout(LifecycleConfig::SESSION_SHUTDOWN_GRACE, async {
            while let Some(joined) = sessions.join_next().await {
                Self::reap(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Aborting {} sessions that did not close in time",
                sessions.len()
            );
            sessions.shutdown().await;
        }
    }

    fn reap(joined: std::result::Result<SessionReport, JoinError>) {
        match joined {
            Ok(report) => match report.outcome {
                SessionOutcome::Failed(e) => debug!(
                    "Session {} failed after {} messages: {}",
                    report.remote_addr, report.messages_acked, e
                ),
                outcome => debug!(
                    "Session {} ended ({:?}) after {} messages",
                    report.remote_addr, outcome, report.messages_acked
                ),
            },
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!("Session task panicked: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_header, read_ack, write_frame};
    use std::time::Duration;
    use tokio::net::TcpStream;

    async fn start_local(max_sessions: usize) -> ServerHandle {
        HlpcServer::bind("127.0.0.1", 0, max_sessions)
            .await
            .unwrap()
            .start()
    }

    async fn wait_for_active(handle: &ServerHandle, expected: usize) -> bool {
        for _ in 0..100 {
            if handle.active_sessions() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_server_start_and_shutdown() {
        let mut handle = start_local(8).await;

        assert!(handle.addr().port() > 0);
        assert_eq!(handle.addr().ip(), std::net::Ipv4Addr::LOCALHOST);
        assert_eq!(handle.active_sessions(), 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_to_port_in_use_is_bind_error() {
        let first = HlpcServer::bind("127.0.0.1", 0, 8).await.unwrap();
        let port = first.local_addr().port();

        let second = HlpcServer::bind("127.0.0.1", port, 8).await;
        match second {
            Err(HlpcError::Bind { addr, .. }) => assert_eq!(addr, format!("127.0.0.1:{}", port)),
            Err(other) => panic!("Expected Bind error, got: {:?}", other),
            Ok(_) => panic!("Second bind to the same port should fail"),
        }
    }

    #[tokio::test]
    async fn test_bind_to_invalid_host_is_bind_error() {
        let result = HlpcServer::bind("not a host name", 5540, 8).await;
        assert!(matches!(result, Err(HlpcError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_server_acknowledges_message() {
        let mut handle = start_local(8).await;

        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        write_frame(&mut stream, "Hey there").await.unwrap();
        assert_eq!(read_ack(&mut stream).await.unwrap(), "Msg received");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_clients_are_counted_independently() {
        let mut handle = start_local(16).await;
        let n = 5;

        let mut clients = Vec::new();
        for i in 0..n {
            let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
            write_frame(&mut stream, &format!("client {}", i)).await.unwrap();
            assert_eq!(read_ack(&mut stream).await.unwrap(), "Msg received");
            clients.push(stream);
        }

        assert_eq!(handle.active_sessions(), n);

        for (remaining, mut stream) in (0..n).rev().zip(clients) {
            write_frame(&mut stream, "!DISCONNECT").await.unwrap();
            read_ack(&mut stream).await.unwrap();
            assert!(wait_for_active(&handle, remaining).await);
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_header_does_not_stop_listener() {
        let mut handle = start_local(8).await;

        let mut bad = TcpStream::connect(handle.addr()).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut bad, &[b'x'; 64])
            .await
            .unwrap();
        assert!(read_ack(&mut bad).await.is_err());

        let mut good = TcpStream::connect(handle.addr()).await.unwrap();
        write_frame(&mut good, "still serving").await.unwrap();
        assert_eq!(read_ack(&mut good).await.unwrap(), "Msg received");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_connections_over_capacity_are_rejected() {
        let mut handle = start_local(1).await;

        let mut first = TcpStream::connect(handle.addr()).await.unwrap();
        write_frame(&mut first, "first").await.unwrap();
        read_ack(&mut first).await.unwrap();

        let mut second = TcpStream::connect(handle.addr()).await.unwrap();
        let _ = write_frame(&mut second, "second").await;
        assert!(read_ack(&mut second).await.is_err());
        assert_eq!(handle.active_sessions(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_all_closes_sessions_but_keeps_listening() {
        let mut handle = start_local(8).await;

        let mut streams = Vec::new();
        for _ in 0..3 {
            let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
            write_frame(&mut stream, "hello").await.unwrap();
            read_ack(&mut stream).await.unwrap();
            streams.push(stream);
        }

        assert_eq!(handle.disconnect_all(), 3);
        assert!(wait_for_active(&handle, 0).await);

        for stream in &mut streams {
            let mut buf = [0u8; 1];
            let n = tokio::io::AsyncReadExt::read(stream, &mut buf).await.unwrap_or(0);
            assert_eq!(n, 0);
        }

        let mut late = TcpStream::connect(handle.addr()).await.unwrap();
        write_frame(&mut late, "after outage").await.unwrap();
        assert_eq!(read_ack(&mut late).await.unwrap(), "Msg received");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_all_reaches_client_stalled_mid_message() {
        let mut handle = start_local(8).await;

        let mut stalled = TcpStream::connect(handle.addr()).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut stalled, &encode_header(20).unwrap())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut stalled, b"part")
            .await
            .unwrap();
        assert!(wait_for_active(&handle, 1).await);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.disconnect_all(), 1);
        assert!(wait_for_active(&handle, 0).await);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_connected_sessions() {
        let mut handle = start_local(8).await;
        let addr = handle.addr();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, "hello").await.unwrap();
        read_ack(&mut stream).await.unwrap();

        handle.shutdown().await;
        assert_eq!(handle.active_sessions(), 0);

        let mut buf = [0u8; 1];
        let n = tokio::io::AsyncReadExt::read(&mut stream, &mut buf)
            .await
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
