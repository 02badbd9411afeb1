//! In-process transport.
//!
//! Connections are pairs of unbounded channels; the "server" side of each
//! accepted connection is handed out as a [`MemoryPeer`]. Connect attempts
//! follow a script of [`ConnectOutcome`]s, which makes the transport useful
//! for exercising reconnection behavior without a network.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use taskwire_protocol::Frame;
use tokio::sync::mpsc;
use tracing::debug;

use crate::traits::{Connection, ConnectionId, Credential, Transport, TransportError};

/// What the next connect attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Open a connection.
    Accept,
    /// Fail as if the server were unreachable.
    Refuse,
    /// Reject the credential.
    Reject,
}

/// Server side of an accepted in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    /// Credential the client presented.
    pub credential: Credential,
    /// Id of the client-side connection.
    pub connection_id: ConnectionId,
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl MemoryPeer {
    /// Push a frame to the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the client side has gone away.
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.to_client
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Wait for the next frame from the client.
    ///
    /// Returns `None` once the client has closed the connection.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Take a frame from the client if one is already queued.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_client.try_recv().ok()
    }

    /// Close the connection from the server side.
    pub fn close(self) {
        debug!(connection = %self.connection_id, "Memory peer closed");
    }
}

/// Scripted in-process transport.
pub struct MemoryTransport {
    script: Mutex<VecDeque<ConnectOutcome>>,
    fallback: ConnectOutcome,
    attempts: AtomicU32,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryTransport {
    /// Create a transport that accepts every attempt not covered by a script.
    ///
    /// Returns the transport and the stream of accepted peers.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        Self::with_fallback(ConnectOutcome::Accept)
    }

    /// Create a transport whose unscripted attempts end with `fallback`.
    #[must_use]
    pub fn with_fallback(fallback: ConnectOutcome) -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let transport = Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            attempts: AtomicU32::new(0),
            peers,
        };
        (transport, accepted)
    }

    /// Queue the outcome of a future connect attempt.
    pub fn push_outcome(&self, outcome: ConnectOutcome) {
        self.script.lock().push_back(outcome);
    }

    /// Queue several outcomes in order.
    pub fn script(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.script.lock().extend(outcomes);
    }

    /// Number of connect attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, credential: &Credential) -> Result<Box<dyn Connection>, TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self.script.lock().pop_front().unwrap_or(self.fallback);
        debug!(attempt, ?outcome, "Memory connect attempt");

        match outcome {
            ConnectOutcome::Refuse => {
                return Err(TransportError::ConnectFailed("connection refused".into()))
            }
            ConnectOutcome::Reject => {
                return Err(TransportError::Unauthorized("credential rejected".into()))
            }
            ConnectOutcome::Accept => {}
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let id = ConnectionId::generate();

        let peer = MemoryPeer {
            credential: credential.clone(),
            connection_id: id.clone(),
            to_client,
            from_client,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::ConnectFailed("memory server is gone".into()))?;

        Ok(Box::new(MemoryConnection {
            id,
            incoming,
            outgoing: Some(outgoing),
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Client side of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    incoming: mpsc::UnboundedReceiver<Frame>,
    outgoing: Option<mpsc::UnboundedSender<Frame>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        if self.outgoing.is_none() {
            return Ok(None);
        }
        let frame = self.incoming.recv().await;
        if frame.is_none() {
            self.outgoing = None;
        }
        Ok(frame)
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let outgoing = self
            .outgoing
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?;
        outgoing
            .send(frame)
            .map_err(|_| TransportError::SendFailed("peer dropped".into()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outgoing = None;
        self.incoming.close();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.outgoing.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn credential() -> Credential {
        Credential::new("token").unwrap()
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (transport, mut peers) = MemoryTransport::new();
        let mut conn = transport.connect(&credential()).await.unwrap();
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(peer.credential, credential());

        peer.send(Frame::new("taskUpdated", json!({"id": 1}))).unwrap();
        let frame = conn.recv().await.unwrap().unwrap();
        assert_eq!(frame.event, "taskUpdated");

        conn.send(Frame::signal("join_dashboard")).await.unwrap();
        assert_eq!(peer.recv().await.unwrap().event, "join_dashboard");
    }

    #[tokio::test]
    async fn test_script_then_fallback() {
        let (transport, _peers) = MemoryTransport::with_fallback(ConnectOutcome::Refuse);
        transport.script([ConnectOutcome::Reject, ConnectOutcome::Accept]);

        let first = transport.connect(&credential()).await;
        assert!(matches!(first, Err(TransportError::Unauthorized(_))));
        assert!(transport.connect(&credential()).await.is_ok());
        let third = transport.connect(&credential()).await;
        assert!(matches!(third, Err(TransportError::ConnectFailed(_))));
        assert_eq!(transport.attempts(), 3);
    }

    #[tokio::test]
    async fn test_peer_close_ends_stream() {
        let (transport, mut peers) = MemoryTransport::new();
        let mut conn = transport.connect(&credential()).await.unwrap();
        peers.recv().await.unwrap().close();

        assert!(conn.recv().await.unwrap().is_none());
        assert!(!conn.is_open());
        assert!(matches!(
            conn.send(Frame::signal("x")).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_client_close_is_seen_by_peer() {
        let (transport, mut peers) = MemoryTransport::new();
        let mut conn = transport.connect(&credential()).await.unwrap();
        let mut peer = peers.recv().await.unwrap();

        conn.close().await.unwrap();
        assert!(peer.recv().await.is_none());
        assert!(peer.send(Frame::signal("late")).is_err());
    }
}
