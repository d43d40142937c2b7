use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::engine::{Engine, EngineError, now_ms};
use crate::model::Ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    pub initial_delay: Duration,
    /// Pause between the end of one sweep and the start of the next.
    pub interval: Duration,
    /// Holds older than this are expired.
    pub hold_ttl: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            interval: Duration::from_secs(30),
            hold_ttl: Duration::from_secs(300),
        }
    }
}

/// Expire every HOLD created at or before `now - ttl`. Returns the number expired.
pub async fn sweep_once(engine: &Engine, ttl: Duration, now: Ms) -> Result<u64, EngineError> {
    let ttl_ms = Ms::try_from(ttl.as_millis()).unwrap_or(Ms::MAX);
    engine.expire_holds(now.saturating_sub(ttl_ms)).await
}

/// Background task that periodically expires stale holds. Runs with a fixed delay: the
/// next sweep starts `interval` after the previous one finished, so sweeps never overlap.
pub async fn run_sweeper(engine: Arc<Engine>, config: SweeperConfig) {
    let mut delay = config.initial_delay;
    loop {
        tokio::time::sleep(delay).await;
        delay = config.interval;
        match sweep_once(&engine, config.hold_ttl, now_ms()).await {
            Ok(0) => tracing::trace!("sweep: nothing to expire"),
            Ok(n) => {
                metrics::counter!(crate::observability::HOLDS_EXPIRED_TOTAL).increment(n);
                info!("sweep expired {n} holds");
            }
            Err(e) => {
                metrics::counter!(crate::observability::SWEEPER_FAILURES_TOTAL).increment(1);
                warn!("sweep failed, retrying next tick: {e}");
            }
        }
    }
}

/// Background task that compacts the WAL once enough commits have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
