//! # taskwire-core
//!
//! Routing and client-side state for the Taskwire event hub.
//!
//! This crate provides the building blocks the hub drives:
//!
//! - **Router** - topic fan-out to independent subscribers
//! - **Typing** - per-room typing indicators with TTL eviction
//! - **Presence** - per-room online rosters
//! - **Dashboard** - latest-wins metric cache and activity feed
//! - **Notifications** - push/poll reconciliation
//! - **Dispatcher** - turns inbound frames into state changes and events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │    Frame    │────▶│ Dispatcher  │────▶│   Router    │──▶ subscribers
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!          ┌─────────────┬───┴─────────┬──────────────┐
//!          ▼             ▼             ▼              ▼
//!     ┌─────────┐  ┌──────────┐  ┌───────────┐  ┌───────────────┐
//!     │ Typing  │  │ Presence │  │ Dashboard │  │ Notifications │
//!     └─────────┘  └──────────┘  └───────────┘  └───────────────┘
//! ```

pub mod dashboard;
pub mod dispatch;
pub mod event;
pub mod notifications;
pub mod presence;
pub mod router;
pub mod typing;

pub use dashboard::{DashboardCache, MetricEntry};
pub use dispatch::{DispatchConfig, Dispatcher};
pub use event::{topics, ConnectionState, Event};
pub use notifications::{
    DesktopNotifier, LogNotifier, NoopNotifier, Notification, NotificationReconciler,
    NotifyError, Permission, PollOutcome,
};
pub use presence::PresenceRegistry;
pub use router::{
    HandlerError, HandlerResult, Router, RouterConfig, RouterError, RouterStats, Subscription,
};
pub use typing::{TypingEntry, TypingRegistry};
