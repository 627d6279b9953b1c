use std::sync::Arc;

use ecocab_dispatch::ExpirySweeper;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

/// Periodically re-dispatches or expires rides whose reservation window
/// lapsed. Runs until the process exits.
pub async fn start_expiry_worker(sweeper: Arc<ExpirySweeper>, every: Duration) {
    info!("Expiry worker started, sweeping every {:?}", every);

    let mut ticker = interval(every);
    // A slow sweep must not cause a burst of catch-up ticks.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if let Err(e) = sweeper.sweep_once().await {
            error!("Expiry sweep failed: {}", e);
        }
    }
}
