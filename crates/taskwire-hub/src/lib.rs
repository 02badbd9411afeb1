//! # taskwire-hub
//!
//! Real-time event hub for the Taskwire project-management app.
//!
//! The hub keeps one connection to the event server alive and fans its
//! traffic out to any number of independent consumers:
//!
//! - **Hub** - session lifecycle and the subscribe/query surface
//! - **Controller** - connection state machine with bounded retries
//! - **Commands** - typed outbound actions, gated on the connection state
//! - **Poller** - periodic notification fetch, reconciled with pushes
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskwire_core::topics;
//! use taskwire_hub::Hub;
//! use taskwire_transport::WebSocketTransport;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let hub = Hub::new(Arc::new(WebSocketTransport::with_url("wss://app.example.com/ws")));
//! let _presence = hub.subscribe(topics::PRESENCE, |event| {
//!     println!("{:?}", event);
//!     Ok(())
//! })?;
//! hub.start("token")?;
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod poller;

pub use commands::Commands;
pub use config::Config;
pub use controller::ReconnectPolicy;
pub use error::{CommandError, HubError, PollError};
pub use hub::{Hub, HubOptions, Notifications};
pub use poller::{spawn_poller, HttpNotificationSource, NotificationSource};
