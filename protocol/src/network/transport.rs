//! # TCP Transport
//!
//! Long-lived TCP connections between peers. The transport owns the sockets
//! and the peer registry; everything above it sees two channels and a
//! handful of send methods.
//!
//! ## Framing
//!
//! Each wire frame is a 4-byte big-endian length followed by that many bytes
//! of encoded [`Message`](super::message::Message). The transport never
//! decodes payloads: frames are self-delimiting, so it stays agnostic to
//! the codec and hands raw bytes to the dispatcher.
//!
//! ## Peer lifecycle
//!
//! Accepted and dialed sockets get identical treatment: build a peer, run
//! the configured handshake (default no-op), register under the remote
//! address, emit a peer event, then loop reading frames into the shared
//! inbound channel. Any read error deregisters and closes the peer.
//!
//! Peer events use a non-blocking send and are dropped (with a log line)
//! when the event channel is full: the read path must stay live even if the
//! consumer stalls.
//!
//! ## Ordering
//!
//! Frames from one peer reach the inbound channel in socket order. Nothing
//! is guaranteed across peers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config;

/// A stable textual identifier for a peer's network endpoint (host:port).
pub type NetAddr = String;

/// The in-process envelope the transport hands to the dispatcher: who sent
/// the frame, and the raw frame payload.
#[derive(Debug, Clone)]
pub struct Rpc {
    /// Remote address of the sending peer.
    pub from: NetAddr,
    /// Undecoded frame payload (one encoded `Message`).
    pub payload: Vec<u8>,
}

/// Post-connect hook run before a peer is registered. Returning an error
/// drops the connection. The default does nothing.
pub type HandshakeFn = fn(&TcpPeer) -> Result<(), TransportError>;

/// The default handshake: accept everyone.
pub fn nop_handshake(_peer: &TcpPeer) -> Result<(), TransportError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Transport-level failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} is not registered")]
    PeerUnknown(NetAddr),

    #[error("frame of {got} bytes exceeds the {limit}-byte limit")]
    FrameTooLarge { got: usize, limit: usize },

    #[error("handshake rejected peer: {0}")]
    HandshakeRejected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// TcpPeer
// ---------------------------------------------------------------------------

/// One live remote peer.
///
/// Shared (`Arc`) between the registry, the peer-event consumer and the
/// read task, so the dispatcher can reply to a peer directly without going
/// back through the registry.
pub struct TcpPeer {
    addr: NetAddr,
    outbound: bool,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
}

impl TcpPeer {
    /// The remote address this peer is registered under.
    pub fn remote_addr(&self) -> &NetAddr {
        &self.addr
    }

    /// `true` when this side dialed the connection.
    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    /// Writes one length-prefixed frame to the peer.
    pub async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > config::MAX_FRAME_BYTES {
            return Err(TransportError::FrameTooLarge {
                got: payload.len(),
                limit: config::MAX_FRAME_BYTES,
            });
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
        writer.write_all(payload).await?;
        writer.flush().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TcpTransport
// ---------------------------------------------------------------------------

/// The node's TCP endpoint: listener, dialer, and peer registry.
pub struct TcpTransport {
    listen_addr: NetAddr,
    handshake: HandshakeFn,
    peers: RwLock<HashMap<NetAddr, Arc<TcpPeer>>>,
    rpc_tx: mpsc::Sender<Rpc>,
    rpc_rx: Mutex<Option<mpsc::Receiver<Rpc>>>,
    peer_tx: mpsc::Sender<Arc<TcpPeer>>,
    peer_rx: Mutex<Option<mpsc::Receiver<Arc<TcpPeer>>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TcpTransport {
    /// Creates a transport that will listen on `listen_addr`, with the
    /// default no-op handshake.
    pub fn new(listen_addr: impl Into<NetAddr>) -> Self {
        Self::with_handshake(listen_addr, nop_handshake)
    }

    /// Creates a transport with a custom handshake hook.
    pub fn with_handshake(listen_addr: impl Into<NetAddr>, handshake: HandshakeFn) -> Self {
        let (rpc_tx, rpc_rx) = mpsc::channel(config::RPC_CHANNEL_CAPACITY);
        let (peer_tx, peer_rx) = mpsc::channel(config::PEER_EVENT_CAPACITY);
        Self {
            listen_addr: listen_addr.into(),
            handshake,
            peers: RwLock::new(HashMap::new()),
            rpc_tx,
            rpc_rx: Mutex::new(Some(rpc_rx)),
            peer_tx,
            peer_rx: Mutex::new(Some(peer_rx)),
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Takes the inbound RPC channel. May be called once.
    pub fn consume(&self) -> mpsc::Receiver<Rpc> {
        self.rpc_rx
            .lock()
            .take()
            .expect("consume may only be called once")
    }

    /// Takes the peer-event channel. May be called once. Fires exactly once
    /// per successful peer registration.
    pub fn peer_events(&self) -> mpsc::Receiver<Arc<TcpPeer>> {
        self.peer_rx
            .lock()
            .take()
            .expect("peer_events may only be called once")
    }

    /// Binds the listener and starts the accept loop in the background.
    pub async fn listen_and_accept(self: Arc<Self>) -> Result<(), TransportError> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        let local = listener.local_addr()?;
        *self.local_addr.lock() = Some(local);
        info!(addr = %local, "transport listening");

        let transport = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _remote)) => {
                        let transport = Arc::clone(&transport);
                        tokio::spawn(async move {
                            transport.handle_conn(stream, false).await;
                        });
                    }
                    Err(e) => {
                        error!(err = %e, "accept failed, stopping listener");
                        break;
                    }
                }
            }
        });
        *self.accept_task.lock() = Some(handle);
        Ok(())
    }

    /// Opens an outbound connection. Post-handshake handling is identical
    /// to an accepted connection.
    pub async fn dial(self: Arc<Self>, addr: &str) -> Result<(), TransportError> {
        let stream = TcpStream::connect(addr).await?;
        debug!(addr = %addr, "dialed peer");
        tokio::spawn(async move {
            self.handle_conn(stream, true).await;
        });
        Ok(())
    }

    /// Unicast to a registered peer. Fails with `PeerUnknown` otherwise.
    pub async fn send_message(&self, to: &str, payload: &[u8]) -> Result<(), TransportError> {
        let peer = self
            .peers
            .read()
            .get(to)
            .cloned()
            .ok_or_else(|| TransportError::PeerUnknown(to.to_string()))?;
        peer.send(payload).await
    }

    /// Fan-out to every registered peer. Individual write failures are
    /// logged and skipped; the slow or dead peer will be torn down by its
    /// own read loop.
    pub async fn broadcast(&self, payload: &[u8]) {
        let peers: Vec<Arc<TcpPeer>> = self.peers.read().values().cloned().collect();
        for peer in peers {
            if let Err(e) = peer.send(payload).await {
                warn!(peer = %peer.remote_addr(), err = %e, "broadcast write failed, skipping peer");
            }
        }
    }

    /// Number of currently registered peers.
    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// The actual bound address, once listening (useful with port 0).
    pub fn local_addr(&self) -> Option<NetAddr> {
        self.local_addr.lock().as_ref().map(|a| a.to_string())
    }

    /// Stops accepting new connections. Existing peer read loops terminate
    /// when their sockets fail or close.
    pub fn close(&self) {
        if let Some(handle) = self.accept_task.lock().take() {
            handle.abort();
        }
        info!(addr = %self.listen_addr, "transport closed");
    }

    /// Shared path for accepted and dialed sockets: handshake, register,
    /// emit the peer event, then read frames until the socket dies.
    async fn handle_conn(&self, stream: TcpStream, outbound: bool) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(err = %e, "failed to set TCP_NODELAY");
        }
        let remote = match stream.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(e) => {
                warn!(err = %e, "connection lost before registration");
                return;
            }
        };
        let (mut read_half, write_half) = stream.into_split();

        let peer = Arc::new(TcpPeer {
            addr: remote.clone(),
            outbound,
            writer: tokio::sync::Mutex::new(write_half),
        });

        if let Err(e) = (self.handshake)(&peer) {
            warn!(peer = %remote, err = %e, "handshake failed, dropping connection");
            return;
        }

        self.peers.write().insert(remote.clone(), Arc::clone(&peer));
        info!(peer = %remote, outbound, "peer registered");

        if self.peer_tx.try_send(Arc::clone(&peer)).is_err() {
            warn!(peer = %remote, "peer event dropped: channel full");
        }

        loop {
            match read_frame(&mut read_half).await {
                Ok(payload) => {
                    let rpc = Rpc {
                        from: remote.clone(),
                        payload,
                    };
                    if self.rpc_tx.send(rpc).await.is_err() {
                        // Dispatcher is gone; the node is shutting down.
                        break;
                    }
                }
                Err(e) => {
                    debug!(peer = %remote, err = %e, "peer read failed, dropping connection");
                    break;
                }
            }
        }

        self.peers.write().remove(&remote);
        info!(peer = %remote, "peer deregistered");
    }
}

/// Reads one length-prefixed frame, bounding the allocation.
async fn read_frame(reader: &mut OwnedReadHalf) -> Result<Vec<u8>, TransportError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > config::MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            got: len,
            limit: config::MAX_FRAME_BYTES,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn listening_transport() -> (Arc<TcpTransport>, mpsc::Receiver<Rpc>, mpsc::Receiver<Arc<TcpPeer>>, NetAddr)
    {
        let transport = Arc::new(TcpTransport::new("127.0.0.1:0"));
        let rpc_rx = transport.consume();
        let peer_rx = transport.peer_events();
        transport.clone().listen_and_accept().await.unwrap();
        let addr = transport.local_addr().unwrap();
        (transport, rpc_rx, peer_rx, addr)
    }

    async fn recv_timeout<T>(rx: &mut mpsc::Receiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting on channel")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn dial_registers_peers_on_both_sides() {
        let (server, _server_rpc, mut server_peers, server_addr) = listening_transport().await;
        let (client, _client_rpc, mut client_peers, _) = listening_transport().await;

        client.clone().dial(&server_addr).await.unwrap();

        let inbound = recv_timeout(&mut server_peers).await;
        assert!(!inbound.is_outbound());

        let outbound = recv_timeout(&mut client_peers).await;
        assert!(outbound.is_outbound());
        assert_eq!(outbound.remote_addr(), &server_addr);

        assert_eq!(server.peer_count(), 1);
        assert_eq!(client.peer_count(), 1);
    }

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (_server, mut server_rpc, _server_peers, server_addr) = listening_transport().await;
        let (client, _client_rpc, mut client_peers, _) = listening_transport().await;

        client.clone().dial(&server_addr).await.unwrap();
        recv_timeout(&mut client_peers).await; // wait for registration

        for i in 0u8..5 {
            client.send_message(&server_addr, &[i, i, i]).await.unwrap();
        }

        for i in 0u8..5 {
            let rpc = recv_timeout(&mut server_rpc).await;
            assert_eq!(rpc.payload, vec![i, i, i]);
        }
    }

    #[tokio::test]
    async fn send_to_unknown_peer_fails() {
        let (transport, _rpc, _peers, _) = listening_transport().await;
        let err = transport
            .send_message("203.0.113.1:9999", b"hello")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::PeerUnknown(_)));
    }

    #[tokio::test]
    async fn broadcast_reaches_every_peer() {
        let (hub, _hub_rpc, mut hub_peers, hub_addr) = listening_transport().await;
        let (alpha, mut a_rpc, mut a_peers, _) = listening_transport().await;
        let (beta, mut b_rpc, mut b_peers, _) = listening_transport().await;

        alpha.clone().dial(&hub_addr).await.unwrap();
        beta.clone().dial(&hub_addr).await.unwrap();
        recv_timeout(&mut a_peers).await;
        recv_timeout(&mut b_peers).await;
        recv_timeout(&mut hub_peers).await;
        recv_timeout(&mut hub_peers).await;

        hub.broadcast(b"to-everyone").await;

        assert_eq!(recv_timeout(&mut a_rpc).await.payload, b"to-everyone");
        assert_eq!(recv_timeout(&mut b_rpc).await.payload, b"to-everyone");
    }

    #[tokio::test]
    async fn peer_is_deregistered_after_disconnect() {
        let (server, _server_rpc, mut server_peers, server_addr) = listening_transport().await;

        {
            let raw = TcpStream::connect(&server_addr).await.unwrap();
            recv_timeout(&mut server_peers).await;
            assert_eq!(server.peer_count(), 1);
            drop(raw); // closes the socket
        }

        // The server's read loop observes EOF and deregisters.
        for _ in 0..50 {
            if server.peer_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("peer was never deregistered");
    }

    #[tokio::test]
    async fn oversized_frame_drops_the_connection() {
        let (server, _server_rpc, mut server_peers, server_addr) = listening_transport().await;

        let mut raw = TcpStream::connect(&server_addr).await.unwrap();
        recv_timeout(&mut server_peers).await;

        // Advertise a frame far beyond the limit; the server must hang up
        // rather than allocate.
        let huge = (config::MAX_FRAME_BYTES as u32 + 1).to_be_bytes();
        raw.write_all(&huge).await.unwrap();

        for _ in 0..50 {
            if server.peer_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("oversized frame did not drop the peer");
    }
}
