//! Scheduled purge of spent action tokens.
//!
//! Expiry and consumption are enforced at consume time; this only keeps the
//! table from growing without bound.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::rate_limit::RateLimitConfig;
use crate::repository::ActionTokenRepository;

/// How long expired or consumed tokens are kept before being purged.
pub const PURGE_GRACE: Duration = Duration::from_secs(24 * 60 * 60);

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run the purge once. Returns the number of rows removed.
pub async fn run_cleanup(tokens: &dyn ActionTokenRepository, clock: &dyn Clock) -> u64 {
    let cutoff = clock.now().saturating_sub(PURGE_GRACE.as_secs());

    match tokens.purge(cutoff, cutoff).await {
        Ok(count) if count > 0 => {
            info!("Cleaned up {} spent action tokens", count);
            count
        }
        Ok(_) => 0,
        Err(e) => {
            error!("Failed to clean up action tokens: {}", e);
            0
        }
    }
}

/// Forget rate-limit state for addresses that have gone quiet.
pub fn prune_rate_limits(rate_limit: &RateLimitConfig) {
    let tracked = rate_limit.retain_recent();
    debug!(tracked, "Pruned rate limiter state");
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    tokens: Arc<dyn ActionTokenRepository>,
    clock: Arc<dyn Clock>,
    rate_limit: Arc<RateLimitConfig>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(tokens.as_ref(), clock.as_ref()).await;
            prune_rate_limits(&rate_limit);
        }
    })
}
