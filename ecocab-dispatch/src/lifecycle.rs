use std::sync::Arc;

use ecocab_domain::{
    Clock, DeviceRegistry, RideError, RideEvent, RideRequest, RideStatus, RideStore, VehicleStatus,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::DispatchEngine;
use crate::ledger::ReservationLedger;

/// Attempts before a compare-and-set loss is surfaced to the caller.
const TRANSITION_RETRIES: u32 = 3;

/// Validates and applies ride status transitions, with their seat-accounting
/// side effects.
///
/// Every transition commits through `RideStore::update_if_status`, so a
/// concurrent writer makes the commit fail cleanly; the transition is then
/// re-validated against the fresh row a bounded number of times.
pub struct RideLifecycle {
    rides: Arc<dyn RideStore>,
    registry: Arc<dyn DeviceRegistry>,
    ledger: ReservationLedger,
    engine: Arc<DispatchEngine>,
    clock: Arc<dyn Clock>,
}

impl RideLifecycle {
    pub fn new(
        rides: Arc<dyn RideStore>,
        registry: Arc<dyn DeviceRegistry>,
        engine: Arc<DispatchEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rides,
            ledger: ReservationLedger::new(registry.clone()),
            registry,
            engine,
            clock,
        }
    }

    /// Apply `event` to the ride and return the resulting row.
    pub async fn apply(&self, ride_id: Uuid, event: RideEvent) -> Result<RideRequest, RideError> {
        let mut last_conflict = RideError::ConcurrencyConflict(ride_id);
        for attempt in 0..TRANSITION_RETRIES {
            if attempt > 0 {
                debug!(%ride_id, attempt, "retrying transition after conflict");
            }
            match self.try_apply(ride_id, event).await {
                Err(RideError::ConcurrencyConflict(id)) => {
                    last_conflict = RideError::ConcurrencyConflict(id);
                }
                other => return other,
            }
        }
        Err(last_conflict)
    }

    async fn try_apply(&self, ride_id: Uuid, event: RideEvent) -> Result<RideRequest, RideError> {
        let mut ride = self
            .rides
            .get(ride_id)
            .await?
            .ok_or(RideError::RideNotFound(ride_id))?;
        let from = ride.status;
        let to = event.target(from).ok_or(RideError::InvalidTransition {
            from,
            to: requested_status(event),
        })?;

        match event {
            RideEvent::Accept => {
                // Seats are already held since selection; nothing to debit.
                ride.status = to;
                self.commit(&mut ride, from).await?;
            }
            RideEvent::Start => {
                ride.status = to;
                self.commit(&mut ride, from).await?;
                if let Some(vehicle_id) = ride.vehicle_id {
                    self.registry
                        .set_vehicle_status(vehicle_id, VehicleStatus::EnRoute)
                        .await?;
                }
            }
            RideEvent::Reject => {
                // Hand-off: release, exclude the rejecting vehicle, re-match.
                self.engine.redispatch(&mut ride).await?;
            }
            RideEvent::Cancel => {
                let vehicle = ride.vehicle_id.take();
                ride.status = to;
                self.commit(&mut ride, from).await?;
                self.ledger.release(vehicle, ride.seats_required).await?;
            }
            RideEvent::Complete => {
                // Vehicle reference is kept for history; the seats go back.
                ride.status = to;
                self.commit(&mut ride, from).await?;
                self.ledger
                    .release(ride.vehicle_id, ride.seats_required)
                    .await?;
            }
        }

        info!(%ride_id, from = %from, to = %ride.status, "ride transition applied");
        Ok(ride)
    }

    async fn commit(&self, ride: &mut RideRequest, expected: RideStatus) -> Result<(), RideError> {
        if self.rides.update_if_status(ride, expected).await? {
            Ok(())
        } else {
            Err(RideError::ConcurrencyConflict(ride.id))
        }
    }

    /// Read a ride, lazily enforcing its deadline: a stale row is
    /// re-dispatched (or expired) before it is returned.
    pub async fn fetch(&self, ride_id: Uuid) -> Result<RideRequest, RideError> {
        let mut ride = self
            .rides
            .get(ride_id)
            .await?
            .ok_or(RideError::RideNotFound(ride_id))?;

        if ride.is_stale(self.clock.now()) {
            match self.engine.redispatch(&mut ride).await {
                Ok(_) => {}
                // A sweeper beat us to it; the fresh row is authoritative.
                Err(RideError::ConcurrencyConflict(_)) => {
                    ride = self
                        .rides
                        .get(ride_id)
                        .await?
                        .ok_or(RideError::RideNotFound(ride_id))?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(ride)
    }
}

/// The status a caller was asking for, for error reporting.
fn requested_status(event: RideEvent) -> RideStatus {
    match event {
        RideEvent::Accept => RideStatus::Accepted,
        RideEvent::Start => RideStatus::EnRoute,
        RideEvent::Reject => RideStatus::Rejected,
        RideEvent::Cancel => RideStatus::Cancelled,
        RideEvent::Complete => RideStatus::Completed,
    }
}
