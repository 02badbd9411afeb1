//! Transport abstraction traits for Taskwire.
//!
//! These traits define what the hub needs from the link to the server:
//! open a connection with a credential, then exchange frames until either
//! side closes it.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use taskwire_protocol::Frame;
use thiserror::Error;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let seq = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{}", timestamp, seq))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Bearer token presented on every handshake.
///
/// The token never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a bearer token.
    ///
    /// Returns `None` for an empty or whitespace-only token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    /// Get the raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// `Authorization` header value for this credential.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server could not be reached.
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// The server rejected the credential during the handshake.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] taskwire_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Check whether retrying with the same credential is pointless.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, TransportError::Unauthorized(_))
    }
}

/// A transport that can open connections to the server.
///
/// Transports handle the underlying protocol (WebSocket, in-memory, ...) and
/// present a uniform frame-level interface.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection, presenting `credential` in the handshake.
    async fn connect(&self, credential: &Credential) -> Result<Box<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}

/// An open connection to the server.
///
/// `recv` must be cancel-safe: the hub drops a pending `recv` whenever it
/// has an outbound frame to write.
#[async_trait]
pub trait Connection: Send {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Receive the next frame.
    ///
    /// Returns `None` if the connection was closed cleanly.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;

    /// Send a frame.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
    }

    #[test]
    fn test_credential_rejects_blank() {
        assert!(Credential::new("").is_none());
        assert!(Credential::new("   ").is_none());
        assert!(Credential::new("abc").is_some());
    }

    #[test]
    fn test_credential_is_redacted() {
        let credential = Credential::new("s3cret").unwrap();
        assert_eq!(format!("{:?}", credential), "Credential(***)");
        assert_eq!(credential.bearer(), "Bearer s3cret");
    }

    #[test]
    fn test_auth_errors() {
        assert!(TransportError::Unauthorized("401".into()).is_auth());
        assert!(!TransportError::Timeout.is_auth());
    }
}
