//! Hub error types.

use taskwire_core::ConnectionState;
use thiserror::Error;

/// Errors from starting a hub session.
#[derive(Debug, Error)]
pub enum HubError {
    /// The credential was empty or blank.
    #[error("A non-empty credential is required")]
    MissingCredential,

    /// `start` was called outside a Tokio runtime.
    #[error("No Tokio runtime available to drive the connection")]
    NoRuntime,
}

/// Errors from sending an outbound command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Commands are only accepted while connected.
    #[error("Not connected (state: {0})")]
    NotConnected(ConnectionState),

    /// The session ended before the command could be queued.
    #[error("Connection task has stopped")]
    ChannelClosed,
}

/// Errors from fetching notifications.
#[derive(Debug, Error)]
pub enum PollError {
    /// The request failed.
    #[error("Notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error status.
    #[error("Notification endpoint returned {0}")]
    Status(u16),

    /// The response body did not match the expected shape.
    #[error("Invalid notification list: {0}")]
    Decode(#[from] serde_json::Error),
}
