use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::SessionStore;

/// Spawns the background task that evicts idle sessions every `interval`.
pub fn spawn_session_sweeper(store: Arc<SessionStore>, interval: Duration) -> JoinHandle<()> {
    info!("Session sweeper running every {:?}", interval);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = store.sweep_expired();
            if evicted > 0 {
                debug!("Sweep evicted {} sessions, {} live", evicted, store.len());
            }
        }
    })
}
