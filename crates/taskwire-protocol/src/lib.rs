//! # taskwire-protocol
//!
//! Wire protocol definitions for the Taskwire event hub.
//!
//! Every message is an event frame, `{"event": <topic>, "data": <payload>}`,
//! carried as JSON text or MessagePack binary.
//!
//! - [`frames`] - the frame type
//! - [`codec`] - JSON / MessagePack encoding
//! - [`topics`] - inbound topics and their typed payloads
//! - [`commands`] - outbound commands
//!
//! ## Example
//!
//! ```rust
//! use taskwire_protocol::{codec, Command, Inbound};
//!
//! let frame = Command::Typing { room_id: "d-1".into() }.into_frame();
//! let text = codec::encode_json(&frame).unwrap();
//! let decoded = codec::decode_json(&text).unwrap();
//! assert_eq!(Inbound::parse(&decoded).unwrap(), Inbound::Passthrough);
//! ```

pub mod codec;
pub mod commands;
pub mod frames;
pub mod topics;

pub use codec::{Encoded, Encoding, FrameCodec, ProtocolError};
pub use commands::Command;
pub use frames::Frame;
pub use topics::{
    Inbound, MetricKind, NotificationPayload, NotificationScope, Priority, RosterPayload,
    StopTypingPayload, TypingPayload,
};
