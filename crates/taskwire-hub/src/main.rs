//! # Taskwire
//!
//! Command-line client for the Taskwire event hub.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! TASKWIRE_TOKEN=... taskwire
//!
//! # Run with custom config
//! taskwire --config /path/to/taskwire.toml
//!
//! # Run with environment variables
//! TASKWIRE_URL=wss://app.example.com/ws TASKWIRE_TOKEN=... taskwire
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use taskwire_core::{topics, DesktopNotifier, Event, LogNotifier, NoopNotifier};
use taskwire_hub::{config::Config, metrics, spawn_poller, HttpNotificationSource, Hub};
use taskwire_transport::{Credential, WebSocketTransport};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "taskwire", version, about = "Taskwire real-time event hub client")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskwire=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;
    let token = config
        .token
        .clone()
        .context("No credential configured: set TASKWIRE_TOKEN or `token` in the config file")?;

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            warn!("Failed to start metrics server: {}", e);
        }
    }

    let notifier: Arc<dyn DesktopNotifier> = if config.notifications.desktop_alerts {
        Arc::new(LogNotifier)
    } else {
        Arc::new(NoopNotifier)
    };
    let transport = Arc::new(WebSocketTransport::new(config.websocket()));
    let hub = Hub::with_notifier(transport, config.hub_options(), notifier);

    let _events = hub.subscribe(topics::WILDCARD, |event| {
        log_event(event);
        Ok(())
    })?;

    info!("Connecting to {}", config.server.url);
    hub.start(&token)?;

    let cancel = CancellationToken::new();
    let poller = match (&config.notifications.poll_url, Credential::new(token.as_str())) {
        (Some(url), Some(credential)) => Some(spawn_poller(
            hub.notifications(),
            Arc::new(HttpNotificationSource::new(url.clone())),
            credential,
            config.poll_interval(),
            cancel.clone(),
        )),
        _ => None,
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    cancel.cancel();
    if let Some(poller) = poller {
        if let Err(e) = poller.await {
            warn!("Notification poller ended abnormally: {}", e);
        }
    }
    hub.stop();

    Ok(())
}

fn log_event(event: &Event) {
    match event {
        Event::Connection(state) => info!(state = %state, "Connection"),
        Event::Typing { room_id, entries } => {
            let names: Vec<&str> = entries.iter().map(|e| e.display_name.as_str()).collect();
            info!(room = %room_id, typing = ?names, "Typing");
        }
        Event::Presence { room_id, user_ids } => {
            info!(room = %room_id, online = user_ids.len(), "Presence");
        }
        Event::NotificationReceived(n) => {
            info!(id = %n.id, priority = ?n.priority, title = %n.title, "Notification");
        }
        Event::Notifications {
            items,
            unread,
            revision,
        } => {
            info!(total = items.len(), unread, revision, "Notifications");
        }
        Event::Dashboard { kind, .. } => info!(metric = %kind, "Dashboard"),
        Event::Inbound { topic, payload } => debug!(topic = %topic, %payload, "Frame"),
    }
}
