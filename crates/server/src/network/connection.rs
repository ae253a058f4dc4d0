use crate::error::{ServerError, ServerResult};
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Frames queued but not yet written before the lane exerts backpressure.
const LANE_CAPACITY: usize = 256;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to one live TLS stream.
///
/// The writable half of the stream is owned by a writer task fed through a
/// bounded mpsc lane; every outbound frame from any task goes through that
/// lane, so writes to one socket are never byte-interleaved. The handle is
/// cheap to clone and is what the registry and users hold.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    outbound: mpsc::Sender<Vec<u8>>,
}

impl Connection {
    /// Builds a handle around an existing lane sender. The writer side is the
    /// caller's concern; [`Connection::open`] is the production path.
    pub fn from_parts(peer: SocketAddr, outbound: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            id: ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            peer,
            outbound,
        }
    }

    /// Wraps the writable half of a stream in a serialization lane and
    /// returns the handle plus the writer task.
    pub fn open<W>(peer: SocketAddr, writer: W) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(LANE_CAPACITY);
        let connection = Self::from_parts(peer, tx);
        let lane = tokio::spawn(run_lane(connection.id, rx, writer));
        (connection, lane)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues bytes on the lane, waiting for capacity. Fails with
    /// [`ServerError::NullConnection`] once the writer task is gone.
    pub async fn send(&self, bytes: Vec<u8>) -> ServerResult<()> {
        self.outbound
            .send(bytes)
            .await
            .map_err(|_| ServerError::NullConnection)
    }

    /// Best-effort queueing for fan-out paths: a full or closed lane is an
    /// error for this connection only.
    pub fn try_send(&self, bytes: Vec<u8>) -> ServerResult<()> {
        self.outbound
            .try_send(bytes)
            .map_err(|_| ServerError::NullConnection)
    }
}

async fn run_lane<W>(id: ConnectionId, mut rx: mpsc::Receiver<Vec<u8>>, mut writer: W)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(bytes) = rx.recv().await {
        if let Err(error) = writer.write_all(&bytes).await {
            warn!(connection = %id, %error, "write lane failed");
            break;
        }
    }
    // Best-effort TLS shutdown; the peer may already be gone.
    if let Err(error) = writer.shutdown().await {
        debug!(connection = %id, %error, "shutdown after lane close");
    }
}
