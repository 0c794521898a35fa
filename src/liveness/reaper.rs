use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Liveness;
use crate::registry::ConnectionRegistry;

/// Single task servicing every pending grace deadline.
///
/// Sleeps until the earliest deadline, wakes early when a deadline is armed or
/// cancelled, and hands expired identities to [`Liveness::mark_unreachable`].
pub async fn run_grace_reaper(
    liveness: Arc<Liveness>,
    registry: Arc<ConnectionRegistry>,
    token: CancellationToken,
) {
    loop {
        let next = registry.next_grace_deadline();
        tokio::select! {
            _ = token.cancelled() => break,
            _ = registry.grace_changed() => continue,
            _ = sleep_until(next) => {
                for expired in registry.take_expired(Instant::now()) {
                    if let Err(e) = liveness.mark_unreachable(expired.node, expired.unbound_at).await {
                        warn!(node = %expired.node, err = %e, "grace expiry not applied");
                    }
                }
            }
        }
    }
    debug!("grace reaper stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
