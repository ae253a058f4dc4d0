use crate::error::{ServerError, ServerResult};
use crate::router;
use crate::security::limiter::{ConnectionLimiter, spawn_sweeper};
use crate::state::ServerState;
use quill_proto::{Frame, FrameType, Framer, MAX_FRAME_LEN};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

pub mod connection;
pub mod tls;

use connection::Connection;

pub const DEFAULT_PORT: u16 = 55555;
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);
pub const HEARTBEAT_CHECK_INTERVAL: Duration = Duration::from_secs(10);
pub const MAX_HEARTBEATS: u32 = 10;
pub const READ_BUFFER_LEN: usize = 8192;

/// Heartbeat accounting over fixed windows.
///
/// Exceeding [`MAX_HEARTBEATS`] inside one [`HEARTBEAT_CHECK_INTERVAL`]
/// window trips the monitor; crossing a window boundary resets the count.
#[derive(Debug)]
pub(crate) struct HeartbeatMonitor {
    window_start: Instant,
    count: u32,
}

impl HeartbeatMonitor {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
        }
    }

    /// Records one heartbeat; true means the quota was exceeded.
    pub(crate) fn record(&mut self, now: Instant) -> bool {
        if now.duration_since(self.window_start) >= HEARTBEAT_CHECK_INTERVAL {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
        self.count > MAX_HEARTBEATS
    }
}

/// The transport listener: accept loop, TLS handshake, per-connection read
/// task with heartbeat supervision, and router dispatch.
pub struct Network {
    acceptor: Option<TlsAcceptor>,
    limiter: Arc<ConnectionLimiter>,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        Self {
            acceptor: None,
            limiter: Arc::new(ConnectionLimiter::default()),
        }
    }

    pub fn set_tls(&mut self, acceptor: TlsAcceptor) {
        self.acceptor = Some(acceptor);
    }

    /// Binds the listener and serves until shutdown is signalled.
    pub async fn run(
        &self,
        state: Arc<ServerState>,
        host: &str,
        port: u16,
        mut shutdown: watch::Receiver<bool>,
    ) -> ServerResult<()> {
        let acceptor = self
            .acceptor
            .clone()
            .ok_or(ServerError::NullTlsContext)?;
        let address: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad bind address"))?;
        let socket = match address {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        if let Err(error) = socket.set_recv_buffer_size(1024 * 1024) {
            debug!(%error, "could not grow receive buffer");
        }
        harden_socket(&socket);
        socket.bind(address)?;
        let listener = socket.listen(1024)?;
        info!(%address, "listener started");

        let sweeper = spawn_sweeper(Arc::clone(&self.limiter), shutdown.clone());
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("acceptor stopping");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(process(
                            Arc::clone(&state),
                            acceptor.clone(),
                            Arc::clone(&self.limiter),
                            stream,
                            peer,
                            shutdown.clone(),
                        ));
                    }
                    Err(error) => warn!(%error, "accept failed"),
                },
            }
        }
        sweeper.abort();
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn harden_socket(socket: &TcpSocket) {
    use std::os::fd::AsRawFd;
    // Few SYN retransmits: half-open handshakes give up early.
    let syncnt: libc::c_int = 2;
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_SYNCNT,
            std::ptr::addr_of!(syncnt).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        debug!("TCP_SYNCNT not applied");
    }
}

#[cfg(not(target_os = "linux"))]
fn harden_socket(_socket: &TcpSocket) {}

/// One accepted socket: rate-limit gate, TLS handshake under a deadline,
/// registration, then the framed read loop. Every exit path removes the
/// connection from the registry; nothing propagates past this function.
async fn process(
    state: Arc<ServerState>,
    acceptor: TlsAcceptor,
    limiter: Arc<ConnectionLimiter>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    if !limiter.allow(peer.ip()).await {
        debug!(%peer, "connection refused by rate limiter");
        return;
    }

    let tls_stream = match timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(tls_stream)) => tls_stream,
        Ok(Err(error)) => {
            warn!(%peer, %error, "tls handshake failed");
            return;
        }
        Err(_) => {
            warn!(%peer, "tls handshake timed out");
            return;
        }
    };

    let (mut reader, writer) = tokio::io::split(tls_stream);
    let (connection, _lane) = Connection::open(peer, writer);
    if let Err(error) = state.registry.register_connection(connection.clone()).await {
        error!(%peer, %error, "connection registration failed");
        return;
    }
    info!(%peer, connection = %connection.id(), "connected");

    let mut framer = Framer::new();
    let mut monitor = HeartbeatMonitor::new(Instant::now());
    let mut buffer = [0u8; READ_BUFFER_LEN];

    'session: loop {
        let read_result = tokio::select! {
            _ = shutdown.changed() => break 'session,
            result = timeout(READ_TIMEOUT, reader.read(&mut buffer)) => result,
        };
        let received = match read_result {
            Ok(Ok(0)) => {
                info!(%peer, "disconnected");
                break 'session;
            }
            Ok(Ok(received)) => received,
            Ok(Err(error)) => {
                warn!(%peer, %error, "read failed");
                break 'session;
            }
            Err(_) => {
                info!(%peer, "read timed out");
                break 'session;
            }
        };
        framer.write(&buffer[..received]);

        // A hostile length prefix would otherwise buffer without bound.
        if let Some(declared) = framer.first_frame_len() {
            if declared > MAX_FRAME_LEN {
                warn!(%peer, declared, "oversized frame declaration");
                break 'session;
            }
        }

        while framer.can_read() {
            let raw = match framer.read() {
                Ok(raw) => raw,
                Err(error) => {
                    warn!(%peer, %error, "malformed stream");
                    break 'session;
                }
            };
            let frame = match Frame::decode(&raw) {
                Ok(frame) => frame,
                Err(error) => {
                    warn!(%peer, %error, "invalid frame");
                    break 'session;
                }
            };
            if frame.frame_type == FrameType::HeartBeat {
                if monitor.record(Instant::now()) {
                    error!(%peer, "too many heartbeats");
                    break 'session;
                }
                continue;
            }
            if let Err(error) = router::handle_frame(&state, &connection, frame).await {
                warn!(%peer, %error, "dispatch failed");
                break 'session;
            }
        }
    }

    if state
        .registry
        .remove_connection(connection.id())
        .await
        .is_ok()
    {
        info!(%peer, connection = %connection.id(), "connection removed");
    }
}
