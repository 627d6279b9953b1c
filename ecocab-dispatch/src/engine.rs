use std::sync::Arc;

use chrono::Duration;
use ecocab_domain::{
    Clock, DeviceRegistry, RegistryError, RideError, RideRequest, RideStatus, RideStore,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::ledger::ReservationLedger;
use crate::selector::CandidateSelector;

/// Outcome of a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Assigned { vehicle_id: Uuid },
    /// No eligible vehicle. Informational, not an error.
    Unavailable,
}

/// Assigns vehicles to ride requests.
///
/// The loop is bounded by the candidate list: a capacity miss at commit
/// time advances to the next candidate, exhaustion yields `Unavailable`.
pub struct DispatchEngine {
    selector: CandidateSelector,
    ledger: ReservationLedger,
    rides: Arc<dyn RideStore>,
    clock: Arc<dyn Clock>,
    /// How long a reserved vehicle has to answer before the ride is
    /// eligible for re-dispatch.
    window: Duration,
}

impl DispatchEngine {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        rides: Arc<dyn RideStore>,
        clock: Arc<dyn Clock>,
        window: Duration,
    ) -> Self {
        Self {
            selector: CandidateSelector::new(registry.clone()),
            ledger: ReservationLedger::new(registry),
            rides,
            clock,
            window,
        }
    }

    /// Try to reserve the nearest eligible vehicle for `ride`.
    ///
    /// On success the ride is persisted as `reserved` with a fresh deadline
    /// and the mutated `ride` reflects the stored row. The ride row commit
    /// is a compare-and-set on the status observed by the caller; losing it
    /// rolls the seat reservation back and surfaces `ConcurrencyConflict`.
    pub async fn dispatch(&self, ride: &mut RideRequest) -> Result<DispatchOutcome, RideError> {
        let candidates = self
            .selector
            .select(ride.origin, ride.seats_required, &ride.excluded_vehicles)
            .await?;
        debug!(ride_id = %ride.id, count = candidates.len(), "ranked candidates");

        for ranked in candidates {
            let vehicle_id = ranked.candidate.id;
            match self.ledger.reserve(vehicle_id, ride.seats_required).await {
                Ok(()) => {
                    let expected = ride.status;
                    ride.vehicle_id = Some(vehicle_id);
                    ride.status = RideStatus::Reserved;
                    ride.expires_at = self.clock.now() + self.window;

                    if self.rides.update_if_status(ride, expected).await? {
                        info!(
                            ride_id = %ride.id,
                            %vehicle_id,
                            distance_m = ranked.distance_m,
                            "ride assigned"
                        );
                        return Ok(DispatchOutcome::Assigned { vehicle_id });
                    }

                    // Someone else moved the ride while we were reserving.
                    // Put the seats back and let the caller reload.
                    self.ledger
                        .release(Some(vehicle_id), ride.seats_required)
                        .await?;
                    return Err(RideError::ConcurrencyConflict(ride.id));
                }
                Err(
                    RegistryError::InsufficientCapacity { .. }
                    | RegistryError::VehicleUnavailable { .. },
                ) => {
                    // Lost the race for this vehicle; next candidate.
                    debug!(ride_id = %ride.id, %vehicle_id, "candidate gone at commit");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(ride_id = %ride.id, "no vehicle available");
        Ok(DispatchOutcome::Unavailable)
    }

    /// Re-dispatch a ride that lost its vehicle (rejection or expiry).
    ///
    /// The previously assigned vehicle is detached, its seats are released,
    /// and it joins the exclusion set before selection runs again. When no
    /// candidate remains the ride is marked `expired` (terminal) instead of
    /// looping forever.
    ///
    /// The hand-off commits under compare-and-set on the status the caller
    /// observed, which makes concurrent sweeps idempotent: the loser gets
    /// `ConcurrencyConflict` and must skip the ride.
    pub async fn redispatch(&self, ride: &mut RideRequest) -> Result<DispatchOutcome, RideError> {
        let expected = ride.status;
        let previous = ride.vehicle_id.take();
        if let Some(vehicle_id) = previous {
            if !ride.excluded_vehicles.contains(&vehicle_id) {
                ride.excluded_vehicles.push(vehicle_id);
            }
        }
        ride.status = RideStatus::Pending;

        // Claim the ride row first: exactly one worker detaches the vehicle,
        // so the release below cannot run twice.
        if !self.rides.update_if_status(ride, expected).await? {
            return Err(RideError::ConcurrencyConflict(ride.id));
        }
        self.ledger.release(previous, ride.seats_required).await?;

        match self.dispatch(ride).await? {
            DispatchOutcome::Assigned { vehicle_id } => {
                info!(ride_id = %ride.id, %vehicle_id, "ride re-dispatched");
                Ok(DispatchOutcome::Assigned { vehicle_id })
            }
            DispatchOutcome::Unavailable => {
                ride.status = RideStatus::Expired;
                if !self
                    .rides
                    .update_if_status(ride, RideStatus::Pending)
                    .await?
                {
                    return Err(RideError::ConcurrencyConflict(ride.id));
                }
                info!(ride_id = %ride.id, "no candidate left, ride expired");
                Ok(DispatchOutcome::Unavailable)
            }
        }
    }
}
