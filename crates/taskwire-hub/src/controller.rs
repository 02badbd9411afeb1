//! Reconnection controller.
//!
//! One driver task per session owns the connection. It opens the transport,
//! pumps inbound frames into the dispatcher, writes queued commands, sweeps
//! expired typing entries, and retries with a fixed delay until the attempt
//! budget runs out.
//!
//! ```text
//!  start ──▶ Connecting ──ok──▶ Connected ──closed──▶ Reconnecting ──ok──▶ Connected
//!                │                                        │
//!                ├─auth rejected──▶ Failed ◀──budget spent─┤
//!                └─failed──▶ Reconnecting ─────retry──────┘
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use taskwire_core::ConnectionState;
use taskwire_protocol::Frame;
use taskwire_transport::{Connection, Credential, TransportError};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::hub::Inner;
use crate::metrics;

/// Retry policy of the reconnection controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
    /// Upper bound on a single connection attempt.
    pub connect_timeout: Duration,
}

impl ReconnectPolicy {
    /// Attempt budget, never below one.
    #[must_use]
    pub fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Why a live connection ended.
enum SessionEnd {
    /// The session was stopped or replaced.
    Cancelled,
    /// The connection dropped.
    Closed,
}

/// Drive one session until it is cancelled or fails for good.
pub(crate) async fn drive(
    inner: Arc<Inner>,
    epoch: u64,
    credential: Credential,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    cancel: CancellationToken,
) {
    let policy = inner.policy;
    let budget = policy.attempt_budget();
    let mut failures: u32 = 0;

    loop {
        let attempt = failures + 1;
        debug!(attempt, transport = inner.transport.name(), "Connecting");

        let connecting = time::timeout(policy.connect_timeout, inner.transport.connect(&credential));
        let Some(result) = run_until(&inner, &cancel, connecting).await else {
            return;
        };
        let result = result.unwrap_or(Err(TransportError::Timeout));

        match result {
            Ok(mut conn) => {
                failures = 0;
                metrics::record_connect_attempt("accepted");
                if !inner.set_state(epoch, ConnectionState::Connected) {
                    close(conn.as_mut()).await;
                    return;
                }
                info!(connection = %conn.id(), attempt, "Connected");

                let end = match rejoin(&inner, conn.as_mut()).await {
                    Ok(()) => serve(&inner, epoch, conn.as_mut(), &mut outbound, &cancel).await,
                    Err(e) => {
                        warn!(connection = %conn.id(), error = %e, "Failed to restore memberships");
                        SessionEnd::Closed
                    }
                };
                close(conn.as_mut()).await;

                if let SessionEnd::Cancelled = end {
                    return;
                }
                drop_stale(&mut outbound);
                if !inner.set_state(epoch, ConnectionState::Reconnecting) {
                    return;
                }
            }
            Err(e) if e.is_auth() => {
                metrics::record_connect_attempt("rejected");
                error!(error = %e, "Credential rejected, not retrying");
                inner.set_state(epoch, ConnectionState::Failed);
                return;
            }
            Err(e) => {
                failures += 1;
                metrics::record_connect_attempt("failed");
                if failures >= budget {
                    error!(attempts = failures, error = %e, "Giving up on connection");
                    inner.set_state(epoch, ConnectionState::Failed);
                    return;
                }
                warn!(attempt = failures, max_attempts = budget, error = %e, "Connection attempt failed");
                if !inner.set_state(epoch, ConnectionState::Reconnecting) {
                    return;
                }
            }
        }

        if run_until(&inner, &cancel, time::sleep(policy.delay)).await.is_none() {
            return;
        }
    }
}

/// Pump a live connection until it ends.
async fn serve(
    inner: &Inner,
    epoch: u64,
    conn: &mut dyn Connection,
    outbound: &mut mpsc::UnboundedReceiver<Frame>,
    cancel: &CancellationToken,
) -> SessionEnd {
    loop {
        let deadline = inner.dispatcher.next_expiry();

        tokio::select! {
            biased;

            _ = cancel.cancelled() => return SessionEnd::Cancelled,

            Some(frame) = outbound.recv() => {
                let event = frame.event.clone();
                if let Err(e) = conn.send(frame).await {
                    warn!(connection = %conn.id(), event = %event, error = %e, "Send failed");
                    return SessionEnd::Closed;
                }
                metrics::record_frame("outbound");
            }

            received = conn.recv() => match received {
                Ok(Some(frame)) => {
                    metrics::record_frame("inbound");
                    if !inner.dispatch(epoch, frame) {
                        return SessionEnd::Cancelled;
                    }
                }
                Ok(None) => {
                    info!(connection = %conn.id(), "Connection closed by server");
                    return SessionEnd::Closed;
                }
                Err(e) => {
                    warn!(connection = %conn.id(), error = %e, "Connection error");
                    return SessionEnd::Closed;
                }
            },

            _ = sleep_until(deadline) => inner.dispatcher.sweep(Instant::now()),
        }
    }
}

/// Re-announce rooms joined earlier in the session.
async fn rejoin(inner: &Inner, conn: &mut dyn Connection) -> Result<(), TransportError> {
    let frames = inner.memberships.lock().replay_frames();
    if !frames.is_empty() {
        debug!(connection = %conn.id(), count = frames.len(), "Restoring memberships");
    }
    for frame in frames {
        conn.send(frame).await?;
        metrics::record_frame("outbound");
    }
    Ok(())
}

/// Drop frames queued for a connection that no longer exists.
fn drop_stale(outbound: &mut mpsc::UnboundedReceiver<Frame>) {
    let mut dropped = 0;
    while outbound.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        warn!(dropped, "Dropped outbound frames queued for a closed connection");
        metrics::record_frames_dropped(dropped);
    }
}

async fn close(conn: &mut dyn Connection) {
    if let Err(e) = conn.close().await {
        debug!(connection = %conn.id(), error = %e, "Close failed");
    }
}

/// Await `fut` while sweeping typing deadlines.
///
/// Returns `None` if the session is cancelled first.
async fn run_until<F: Future>(inner: &Inner, cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::pin!(fut);
    loop {
        let deadline = inner.dispatcher.next_expiry();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            output = &mut fut => return Some(output),
            _ = sleep_until(deadline) => inner.dispatcher.sweep(Instant::now()),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay, Duration::from_secs(1));
        assert_eq!(policy.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_attempt_budget_is_at_least_one() {
        let policy = ReconnectPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(policy.attempt_budget(), 1);
    }
}
