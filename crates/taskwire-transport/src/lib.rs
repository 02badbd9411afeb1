//! # taskwire-transport
//!
//! Transport abstraction layer for the Taskwire event hub.
//!
//! This crate provides a unified client-side interface over the link to the
//! server:
//!
//! - **WebSocket** - the production transport
//! - **Memory** - scripted in-process connections for tests and demos
//!
//! ## Transport Abstraction
//!
//! All transports implement the `Transport` and `Connection` traits, so the
//! hub never depends on a concrete protocol.
//!
//! ```rust,ignore
//! use taskwire_transport::{Credential, Transport};
//!
//! async fn pump(transport: &dyn Transport, credential: &Credential) {
//!     let mut conn = transport.connect(credential).await.unwrap();
//!     while let Ok(Some(frame)) = conn.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{ConnectOutcome, MemoryPeer, MemoryTransport};
pub use traits::{Connection, ConnectionId, Credential, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
