use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Liveness;
use crate::config::MAX_PERIOD;

/// Runs [`Liveness::sweep_once`] every `period` until `token` is cancelled.
///
/// The first sweep happens one full period after start. A sweep that overruns its
/// period makes the ticker skip the missed ticks instead of bursting. `period` is
/// clamped to `1s..=MAX_PERIOD`.
pub async fn run_sweeper(liveness: Arc<Liveness>, period: Duration, token: CancellationToken) {
    let period = period.clamp(Duration::from_secs(1), MAX_PERIOD);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                liveness.sweep_once().await;
            }
        }
    }
    debug!("sweeper stopped");
}
