//! The timestamp producer.
//!
//! A periodic background task, independent of any client connection, that
//! appends an RFC 2822 timestamp record to the log every `PERIOD`. Runs
//! until shutdown; the supervisor stops it before draining workers.

use crate::log_store::LogStore;
use crate::shutdown::Shutdown;
use chrono::Local;
use std::time::Duration;
use tracing::{debug, error};

/// Interval between timestamp records. The first firing occurs `PERIOD`
/// after the producer starts, not immediately.
const PERIOD: Duration = Duration::from_secs(10);

/// Runs the timestamp producer until `shutdown` is triggered.
///
/// Uses `tokio::time::interval`, whose default `MissedTickBehavior::Burst`
/// keeps this strictly periodic rather than drift-compensated: a late tick
/// fires once it can, but misses are never compressed into a burst of
/// catch-up ticks.
pub async fn run(log: LogStore, shutdown: Shutdown) {
    let mut ticker = tokio::time::interval(PERIOD);
    // The first tick of an `interval` fires immediately; skip it so the
    // first real firing is `PERIOD` after startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.notified() => {
                debug!("timestamp producer stopping");
                return;
            }
        }

        let record = format!("timestamp:{}\n", Local::now().to_rfc2822());
        if let Err(err) = log.append(record.as_bytes()).await {
            error!(%err, "failed to append timestamp record to log");
        }
    }
}
