//! Periodic liveness probing of registered connections.
//!
//! Each cycle the monitor evicts every connection that never acknowledged
//! the previous probe, then probes the rest. Detection is bounded between
//! one and two intervals; no connection survives two missed probes.

use std::time::Duration;

use tracing::debug;

use crate::registry::SharedRegistry;

pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Run the probe sweep until the process exits. The registry lock is taken
/// once per cycle; probes go out through the non-blocking outboxes.
pub async fn run(registry: SharedRegistry, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // interval() yields its first tick immediately; consume it so probing
    // starts one full interval after startup.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let evicted = registry.write().await.sweep();
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "liveness sweep evicted connections");
        }
    }
}
