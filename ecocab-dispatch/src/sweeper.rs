use std::sync::Arc;

use ecocab_domain::{Clock, RideError, RideStore};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::engine::{DispatchEngine, DispatchOutcome};

/// What one sweep cycle did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub redispatched: usize,
    pub expired: usize,
    /// Rides another worker handled first (compare-and-set lost).
    pub skipped: usize,
}

/// Scans stale rides and re-invokes the dispatch engine for each.
///
/// Safe to trigger concurrently: a cycle that finds the previous one still
/// running skips instead of piling up, and per-ride idempotence comes from
/// the engine's compare-and-set hand-off.
pub struct ExpirySweeper {
    rides: Arc<dyn RideStore>,
    engine: Arc<DispatchEngine>,
    clock: Arc<dyn Clock>,
    running: Mutex<()>,
}

impl ExpirySweeper {
    pub fn new(
        rides: Arc<dyn RideStore>,
        engine: Arc<DispatchEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rides,
            engine,
            clock,
            running: Mutex::new(()),
        }
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, RideError> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("previous sweep still running, skipping this cycle");
            return Ok(SweepReport::default());
        };

        let now = self.clock.now();
        let stale = self.rides.list_stale(now).await?;
        let mut report = SweepReport {
            scanned: stale.len(),
            ..SweepReport::default()
        };

        for mut ride in stale {
            let ride_id = ride.id;
            match self.engine.redispatch(&mut ride).await {
                Ok(DispatchOutcome::Assigned { .. }) => report.redispatched += 1,
                Ok(DispatchOutcome::Unavailable) => report.expired += 1,
                Err(RideError::ConcurrencyConflict(_)) => {
                    debug!(%ride_id, "ride already handled elsewhere");
                    report.skipped += 1;
                }
                // One bad ride must not starve the rest of the scan.
                Err(e) => error!(%ride_id, "re-dispatch failed: {e}"),
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                redispatched = report.redispatched,
                expired = report.expired,
                skipped = report.skipped,
                "expiry sweep finished"
            );
        }
        Ok(report)
    }
}
