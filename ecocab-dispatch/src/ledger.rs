use std::sync::Arc;

use ecocab_domain::{DeviceRegistry, RegistryError};
use tracing::{info, warn};
use uuid::Uuid;

/// The only gate through which seats are debited or credited.
///
/// The atomic read-check-write itself lives in the registry backend (row
/// lock per vehicle); this wrapper owns the call-site policy: reserve and
/// release are each invoked exactly once per transition, and releasing a
/// ride that has no vehicle attached is a no-op.
pub struct ReservationLedger {
    registry: Arc<dyn DeviceRegistry>,
}

impl ReservationLedger {
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Debit `seats` and mark the vehicle reserved, or fail without side
    /// effect. An `InsufficientCapacity`/`VehicleUnavailable` failure means
    /// the caller lost the race window between selection and commit and
    /// should move on to its next candidate.
    pub async fn reserve(&self, vehicle_id: Uuid, seats: u32) -> Result<(), RegistryError> {
        self.registry.reserve(vehicle_id, seats).await?;
        info!(%vehicle_id, seats, "reserved seats");
        Ok(())
    }

    /// Credit `seats` back and return the vehicle to `waiting`.
    ///
    /// `vehicle_id = None` (ride never got a vehicle, or it was already
    /// detached) is a no-op. A vanished vehicle is logged and swallowed so a
    /// terminal transition can still complete.
    pub async fn release(&self, vehicle_id: Option<Uuid>, seats: u32) -> Result<(), RegistryError> {
        let Some(vehicle_id) = vehicle_id else {
            return Ok(());
        };
        match self.registry.release(vehicle_id, seats).await {
            Ok(()) => {
                info!(%vehicle_id, seats, "released seats");
                Ok(())
            }
            Err(RegistryError::DeviceNotFound(_)) => {
                warn!(%vehicle_id, "release on unregistered vehicle, skipping");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
