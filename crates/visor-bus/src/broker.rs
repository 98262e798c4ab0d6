//! Process bus broker
//!
//! Listens on a Unix socket for edge-app peers. A peer's first line must be
//! a hello naming its package; every later line is a bus message. The broker
//! stamps each message with the hello identity before forwarding it inbound,
//! so a payload can never speak for another package. Outbound core messages
//! are delivered to one named peer or to all of them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use visor_core::errors::BusError;
use visor_core::protocol::bus::{BusEnvelope, BusHello, BusMessage, CoreBusMessage};
use visor_core::{PackageId, VisorResult};

/// Outbound line buffer per connected peer
const PEER_BUFFER: usize = 64;

static NEXT_CONN: AtomicU64 = AtomicU64::new(1);

/// One registered peer; `conn` tells a stale connection's cleanup apart
/// from a reconnect that took over the package name
struct PeerHandle {
    conn: u64,
    tx: mpsc::Sender<String>,
}

type PeerMap = Arc<Mutex<HashMap<PackageId, PeerHandle>>>;

// ----------------------------------------------------------------------------
// Broker
// ----------------------------------------------------------------------------

pub struct BusBroker {
    socket_path: PathBuf,
    peers: PeerMap,
    inbound: mpsc::Sender<BusEnvelope>,
    listener: Option<JoinHandle<()>>,
}

impl BusBroker {
    pub fn new(socket_path: impl Into<PathBuf>, inbound: mpsc::Sender<BusEnvelope>) -> Self {
        Self {
            socket_path: socket_path.into(),
            peers: Arc::new(Mutex::new(HashMap::new())),
            inbound,
            listener: None,
        }
    }

    /// Bind the socket and accept peers until stopped
    pub async fn start(&mut self) -> VisorResult<()> {
        if self.listener.is_some() {
            return Ok(());
        }

        // A previous run may have left the socket file behind.
        let _ = tokio::fs::remove_file(&self.socket_path).await;
        let listener = UnixListener::bind(&self.socket_path).map_err(BusError::Io)?;
        info!("Bus listening on {}", self.socket_path.display());

        let peers = Arc::clone(&self.peers);
        let inbound = self.inbound.clone();
        self.listener = Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let peers = Arc::clone(&peers);
                        let inbound = inbound.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_peer(stream, peers, inbound).await {
                                debug!("Bus peer ended: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Bus accept failed: {}", e);
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    /// Deliver a core message to one peer, or to every peer when no target
    /// is given. Slow peers lose the message rather than stall the router.
    pub async fn deliver(&self, target: Option<&PackageId>, message: &CoreBusMessage) {
        let line = match serde_json::to_string(message) {
            Ok(line) => line,
            Err(e) => {
                warn!("Unserializable bus message: {}", e);
                return;
            }
        };

        let mut peers = self.peers.lock().await;
        match target {
            Some(package) => {
                let gone = match peers.get(package) {
                    Some(handle) => match handle.tx.try_send(line) {
                        Ok(()) => false,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!("Bus peer {} is stalled; dropping message", package);
                            false
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => true,
                    },
                    None => {
                        debug!("No bus peer for {}", package);
                        false
                    }
                };
                if gone {
                    peers.remove(package);
                }
            }
            None => {
                let mut gone = Vec::new();
                for (package, handle) in peers.iter() {
                    match handle.tx.try_send(line.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!("Bus peer {} is stalled; dropping message", package);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => gone.push(package.clone()),
                    }
                }
                for package in gone {
                    peers.remove(&package);
                }
            }
        }
    }

    /// Number of registered peers
    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Stop accepting, disconnect every peer, and remove the socket file
    pub async fn stop(&mut self) {
        if let Some(task) = self.listener.take() {
            task.abort();
            // Dropping the handles closes each peer's writer, which shuts
            // the connection down from the client's point of view.
            self.peers.lock().await.clear();
            let _ = tokio::fs::remove_file(&self.socket_path).await;
            info!("Bus stopped");
        }
    }
}

impl Drop for BusBroker {
    fn drop(&mut self) {
        if let Some(task) = self.listener.take() {
            task.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Peer Connection
// ----------------------------------------------------------------------------

async fn serve_peer(
    stream: UnixStream,
    peers: PeerMap,
    inbound: mpsc::Sender<BusEnvelope>,
) -> Result<(), BusError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let package = match lines.next_line().await? {
        Some(line) => match serde_json::from_str::<BusHello>(&line) {
            Ok(hello) => hello.package,
            Err(e) => {
                warn!("Bus peer rejected, bad hello: {}", e);
                return Err(BusError::MalformedFrame {
                    reason: e.to_string(),
                });
            }
        },
        None => return Err(BusError::MissingHello),
    };
    info!("Bus peer connected: {}", package);

    let conn = NEXT_CONN.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::channel::<String>(PEER_BUFFER);
    peers
        .lock()
        .await
        .insert(package.clone(), PeerHandle { conn, tx });

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<BusMessage>(&line) {
            Ok(message) => {
                let envelope = BusEnvelope {
                    sender: package.clone(),
                    message,
                };
                if inbound.send(envelope).await.is_err() {
                    // Router is gone; nothing left to serve.
                    break;
                }
            }
            Err(e) => {
                warn!("Dropping malformed frame from {}: {}", package, e);
            }
        }
    }

    // A reconnect under the same package replaces the map entry; only
    // remove it if it is still this connection's.
    {
        let mut peers = peers.lock().await;
        if peers
            .get(&package)
            .map(|handle| handle.conn == conn)
            .unwrap_or(false)
        {
            peers.remove(&package);
        }
    }
    writer.abort();
    info!("Bus peer disconnected: {}", package);
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn socket_in(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("bus.sock")
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, _rx) = mpsc::channel(8);
        let mut broker = BusBroker::new(socket_in(&dir), tx);
        broker.start().await.expect("first start");
        broker.start().await.expect("second start");
        broker.stop().await;
    }

    #[tokio::test]
    async fn test_dead_peer_is_pruned_on_delivery() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, _rx) = mpsc::channel(8);
        let broker = BusBroker::new(socket_in(&dir), tx);

        // Register a peer whose receiver is already gone.
        let (peer_tx, peer_rx) = mpsc::channel::<String>(1);
        drop(peer_rx);
        broker.peers.lock().await.insert(
            PackageId::from("com.example.weather"),
            PeerHandle {
                conn: 1,
                tx: peer_tx,
            },
        );
        assert_eq!(broker.peer_count().await, 1);

        let stop = CoreBusMessage::AppStop {
            package: PackageId::from("com.example.weather"),
        };
        broker.deliver(None, &stop).await;
        assert_eq!(broker.peer_count().await, 0);
    }
}
