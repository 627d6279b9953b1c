use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ecocab_shared::Coordinates;
use uuid::Uuid;

use crate::device::{Device, VehicleCandidate, VehicleStatus};
use crate::ride::{RidePosition, RideRequest, RideStatus};

/// Filter for a candidate scan.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    pub seats_required: u32,
    pub exclude: Vec<Uuid>,
}

/// Device persistence, including the atomic seat-accounting primitives.
///
/// `reserve`, `release` and `set_vehicle_status` are the only paths allowed
/// to mutate a vehicle's capacity or availability, and every implementation
/// must run each of them as one locked read-check-write against the row.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Registers or re-registers a device. Re-registering a vehicle that
    /// still holds reserved seats fails, since overwriting the record would
    /// silently forget the debt.
    async fn insert(&self, device: Device) -> Result<(), RegistryError>;

    async fn get(&self, id: Uuid) -> Result<Option<Device>, RegistryError>;

    /// Returns whether a device was actually removed.
    async fn remove(&self, id: Uuid) -> Result<bool, RegistryError>;

    async fn list_vehicles(&self) -> Result<Vec<Device>, RegistryError>;

    /// Unranked scan for vehicles that are waiting, located, hold enough
    /// seats and are not excluded. Rows currently locked by a concurrent
    /// reserve/release may be skipped; the ledger re-validates at commit.
    /// Iteration order is stable (registration order).
    async fn find_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<VehicleCandidate>, RegistryError>;

    /// Atomically re-check capacity and availability, debit `seats` and mark
    /// the vehicle `reserved`. Fails without side effect when the vehicle is
    /// no longer waiting or no longer has the seats.
    async fn reserve(&self, vehicle_id: Uuid, seats: u32) -> Result<(), RegistryError>;

    /// Inverse of `reserve`: credit `seats` (never above the registered
    /// total) and mark the vehicle `waiting`.
    async fn release(&self, vehicle_id: Uuid, seats: u32) -> Result<(), RegistryError>;

    /// Refuses to return a vehicle to `waiting` while it still holds
    /// reserved seats; only `release` may do that, otherwise the vehicle
    /// would become matchable while a live ride references it.
    async fn set_vehicle_status(
        &self,
        vehicle_id: Uuid,
        status: VehicleStatus,
    ) -> Result<(), RegistryError>;

    /// Administrative resize of a vehicle. Seats already held by rides stay
    /// held; the available count is re-derived from the new total.
    async fn set_seats_total(&self, vehicle_id: Uuid, seats_total: u32)
        -> Result<(), RegistryError>;

    async fn update_location(
        &self,
        id: Uuid,
        location: Coordinates,
    ) -> Result<(), RegistryError>;
}

/// Ride persistence.
#[async_trait]
pub trait RideStore: Send + Sync {
    /// Persists a new ride. Inserting a non-terminal ride for a passenger
    /// who already has one open fails with `OpenRideExists`; this is the
    /// storage-level backstop behind the handler's own guard.
    async fn insert(&self, ride: &RideRequest) -> Result<(), RideError>;

    async fn get(&self, id: Uuid) -> Result<Option<RideRequest>, RideError>;

    /// Compare-and-set write: persist `ride` only if the stored status still
    /// equals `expected`. Returns false when another writer got there first.
    /// This is the lock under which every lifecycle transition commits.
    async fn update_if_status(
        &self,
        ride: &RideRequest,
        expected: RideStatus,
    ) -> Result<bool, RideError>;

    /// Whether the passenger has a ride in a non-terminal state.
    async fn has_open_ride(&self, passenger_id: Uuid) -> Result<bool, RideError>;

    async fn list_for_passenger(&self, passenger_id: Uuid) -> Result<Vec<RideRequest>, RideError>;

    /// Rides currently holding a reservation against this vehicle and
    /// awaiting the driver's answer.
    async fn list_awaiting_response(&self, vehicle_id: Uuid)
        -> Result<Vec<RideRequest>, RideError>;

    /// Rides the vehicle is actively serving (`accepted` or `en_route`).
    async fn list_active_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<RideRequest>, RideError>;

    /// Pending or reserved rides whose window lapsed at `now`.
    async fn list_stale(&self, now: DateTime<Utc>) -> Result<Vec<RideRequest>, RideError>;

    async fn append_position(&self, position: &RidePosition) -> Result<(), RideError>;

    /// Track history in recording order.
    async fn route(&self, ride_id: Uuid) -> Result<Vec<RidePosition>, RideError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("device not found: {0}")]
    DeviceNotFound(Uuid),

    #[error("device {0} is not a vehicle")]
    NotAVehicle(Uuid),

    #[error("vehicle {vehicle_id} has {available} seats available, {requested} requested")]
    InsufficientCapacity {
        vehicle_id: Uuid,
        requested: u32,
        available: u32,
    },

    #[error("vehicle {vehicle_id} is {status}, not accepting reservations")]
    VehicleUnavailable {
        vehicle_id: Uuid,
        status: VehicleStatus,
    },

    #[error("vehicle {vehicle_id} still holds {held} reserved seats")]
    ReservationsHeld { vehicle_id: Uuid, held: u32 },

    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RideError {
    #[error("ride not found: {0}")]
    RideNotFound(Uuid),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: RideStatus, to: RideStatus },

    #[error("passenger {0} already has an open ride")]
    OpenRideExists(Uuid),

    #[error("seats_required must be between 1 and {max}, got {got}")]
    InvalidSeats { got: u32, max: u32 },

    #[error("ride {0} was modified concurrently")]
    ConcurrencyConflict(Uuid),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("storage error: {0}")]
    Storage(String),
}
