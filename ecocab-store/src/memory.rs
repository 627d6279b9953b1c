//! In-memory backends with the same locking discipline as the Postgres
//! ones: one async mutex per row, held for the whole read-check-write.
//! Used by tests and by single-node deployments without a database.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ecocab_domain::{
    CandidateFilter, Device, DeviceKind, DeviceRegistry, RegistryError, RideError, RidePosition,
    RideRequest, RideStatus, RideStore, VehicleCandidate, VehicleStatus,
};
use ecocab_shared::Coordinates;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Row table with stable insertion order.
///
/// The outer `RwLock` only guards the map shape and is never held across an
/// await; row contents are guarded by the per-row mutex.
struct Table<T> {
    rows: HashMap<Uuid, Arc<Mutex<T>>>,
    order: Vec<Uuid>,
}

impl<T> Table<T> {
    fn new() -> Self {
        Self {
            rows: HashMap::new(),
            order: Vec::new(),
        }
    }
}

struct TableHandle<T>(RwLock<Table<T>>);

impl<T> TableHandle<T> {
    fn new() -> Self {
        Self(RwLock::new(Table::new()))
    }

    fn row(&self, id: Uuid) -> Option<Arc<Mutex<T>>> {
        self.0.read().expect("table poisoned").rows.get(&id).cloned()
    }

    /// Rows in insertion order.
    fn snapshot(&self) -> Vec<Arc<Mutex<T>>> {
        let table = self.0.read().expect("table poisoned");
        table
            .order
            .iter()
            .filter_map(|id| table.rows.get(id).cloned())
            .collect()
    }

    /// Registration path, not the contended ledger path. Re-registering an
    /// id swaps the row wholesale (equivalent to delete-and-create) and
    /// keeps its position in iteration order.
    fn upsert(&self, id: Uuid, value: T) {
        let mut table = self.0.write().expect("table poisoned");
        if table.rows.insert(id, Arc::new(Mutex::new(value))).is_none() {
            table.order.push(id);
        }
    }

    fn remove(&self, id: Uuid) -> bool {
        let mut table = self.0.write().expect("table poisoned");
        table.order.retain(|x| *x != id);
        table.rows.remove(&id).is_some()
    }
}

pub struct MemoryDeviceRegistry {
    devices: TableHandle<Device>,
}

impl MemoryDeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: TableHandle::new(),
        }
    }

    fn vehicle_row(&self, id: Uuid) -> Result<Arc<Mutex<Device>>, RegistryError> {
        self.devices.row(id).ok_or(RegistryError::DeviceNotFound(id))
    }
}

impl Default for MemoryDeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceRegistry for MemoryDeviceRegistry {
    async fn insert(&self, device: Device) -> Result<(), RegistryError> {
        // Overwriting a vehicle that holds seats would forget the debt.
        if let Some(row) = self.devices.row(device.id) {
            let existing = row.lock().await;
            if let DeviceKind::Vehicle {
                seats_available,
                seats_total,
                ..
            } = existing.kind
            {
                let held = seats_total.saturating_sub(seats_available);
                if held > 0 {
                    return Err(RegistryError::ReservationsHeld {
                        vehicle_id: device.id,
                        held,
                    });
                }
            }
        }
        self.devices.upsert(device.id, device);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Device>, RegistryError> {
        match self.devices.row(id) {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn remove(&self, id: Uuid) -> Result<bool, RegistryError> {
        Ok(self.devices.remove(id))
    }

    async fn list_vehicles(&self) -> Result<Vec<Device>, RegistryError> {
        let mut vehicles = Vec::new();
        for row in self.devices.snapshot() {
            let device = row.lock().await;
            if device.is_vehicle() {
                vehicles.push(device.clone());
            }
        }
        Ok(vehicles)
    }

    async fn find_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<VehicleCandidate>, RegistryError> {
        let mut candidates = Vec::new();
        for row in self.devices.snapshot() {
            // Skip-on-contention: a row currently being reserved or released
            // is not worth waiting for, reserve re-validates anyway.
            let Ok(device) = row.try_lock() else {
                continue;
            };
            if filter.exclude.contains(&device.id) {
                continue;
            }
            let Some(location) = device.location else {
                continue;
            };
            if let DeviceKind::Vehicle {
                status: VehicleStatus::Waiting,
                seats_available,
                ..
            } = device.kind
            {
                if seats_available >= filter.seats_required {
                    candidates.push(VehicleCandidate {
                        id: device.id,
                        location,
                        seats_available,
                    });
                }
            }
        }
        Ok(candidates)
    }

    async fn reserve(&self, vehicle_id: Uuid, seats: u32) -> Result<(), RegistryError> {
        let row = self.vehicle_row(vehicle_id)?;
        let mut device = row.lock().await;
        match &mut device.kind {
            DeviceKind::Passenger => Err(RegistryError::NotAVehicle(vehicle_id)),
            DeviceKind::Vehicle {
                status,
                seats_available,
                ..
            } => {
                if *status != VehicleStatus::Waiting {
                    return Err(RegistryError::VehicleUnavailable {
                        vehicle_id,
                        status: *status,
                    });
                }
                if *seats_available < seats {
                    return Err(RegistryError::InsufficientCapacity {
                        vehicle_id,
                        requested: seats,
                        available: *seats_available,
                    });
                }
                *seats_available -= seats;
                *status = VehicleStatus::Reserved;
                Ok(())
            }
        }
    }

    async fn release(&self, vehicle_id: Uuid, seats: u32) -> Result<(), RegistryError> {
        let row = self.vehicle_row(vehicle_id)?;
        let mut device = row.lock().await;
        match &mut device.kind {
            DeviceKind::Passenger => Err(RegistryError::NotAVehicle(vehicle_id)),
            DeviceKind::Vehicle {
                status,
                seats_available,
                seats_total,
            } => {
                *seats_available = (*seats_available + seats).min(*seats_total);
                *status = VehicleStatus::Waiting;
                Ok(())
            }
        }
    }

    async fn set_vehicle_status(
        &self,
        vehicle_id: Uuid,
        new_status: VehicleStatus,
    ) -> Result<(), RegistryError> {
        let row = self.vehicle_row(vehicle_id)?;
        let mut device = row.lock().await;
        match &mut device.kind {
            DeviceKind::Passenger => Err(RegistryError::NotAVehicle(vehicle_id)),
            DeviceKind::Vehicle {
                status,
                seats_available,
                seats_total,
            } => {
                // Back to `waiting` means matchable again; only the ledger's
                // release may do that while seats are held.
                let held = seats_total.saturating_sub(*seats_available);
                if new_status == VehicleStatus::Waiting && held > 0 {
                    return Err(RegistryError::ReservationsHeld { vehicle_id, held });
                }
                *status = new_status;
                Ok(())
            }
        }
    }

    async fn set_seats_total(
        &self,
        vehicle_id: Uuid,
        new_total: u32,
    ) -> Result<(), RegistryError> {
        let row = self.vehicle_row(vehicle_id)?;
        let mut device = row.lock().await;
        match &mut device.kind {
            DeviceKind::Passenger => Err(RegistryError::NotAVehicle(vehicle_id)),
            DeviceKind::Vehicle {
                seats_available,
                seats_total,
                ..
            } => {
                let held = seats_total.saturating_sub(*seats_available);
                *seats_total = new_total;
                *seats_available = new_total.saturating_sub(held);
                Ok(())
            }
        }
    }

    async fn update_location(
        &self,
        id: Uuid,
        location: Coordinates,
    ) -> Result<(), RegistryError> {
        let row = self
            .devices
            .row(id)
            .ok_or(RegistryError::DeviceNotFound(id))?;
        row.lock().await.location = Some(location);
        Ok(())
    }
}

pub struct MemoryRideStore {
    rides: TableHandle<RideRequest>,
    positions: Mutex<HashMap<Uuid, Vec<RidePosition>>>,
}

impl MemoryRideStore {
    pub fn new() -> Self {
        Self {
            rides: TableHandle::new(),
            positions: Mutex::new(HashMap::new()),
        }
    }

    async fn collect<F>(&self, mut keep: F) -> Vec<RideRequest>
    where
        F: FnMut(&RideRequest) -> bool,
    {
        let mut out = Vec::new();
        for row in self.rides.snapshot() {
            let ride = row.lock().await;
            if keep(&ride) {
                out.push(ride.clone());
            }
        }
        out
    }
}

impl Default for MemoryRideStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RideStore for MemoryRideStore {
    async fn insert(&self, ride: &RideRequest) -> Result<(), RideError> {
        // Mirrors the partial unique index on the Postgres side.
        if !ride.status.is_terminal() {
            for row in self.rides.snapshot() {
                let stored = row.lock().await;
                if stored.id != ride.id
                    && stored.passenger_id == ride.passenger_id
                    && !stored.status.is_terminal()
                {
                    return Err(RideError::OpenRideExists(ride.passenger_id));
                }
            }
        }
        self.rides.upsert(ride.id, ride.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RideRequest>, RideError> {
        match self.rides.row(id) {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn update_if_status(
        &self,
        ride: &RideRequest,
        expected: RideStatus,
    ) -> Result<bool, RideError> {
        let row = self
            .rides
            .row(ride.id)
            .ok_or(RideError::RideNotFound(ride.id))?;
        let mut stored = row.lock().await;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = ride.clone();
        Ok(true)
    }

    async fn has_open_ride(&self, passenger_id: Uuid) -> Result<bool, RideError> {
        let open = self
            .collect(|r| r.passenger_id == passenger_id && !r.status.is_terminal())
            .await;
        Ok(!open.is_empty())
    }

    async fn list_for_passenger(&self, passenger_id: Uuid) -> Result<Vec<RideRequest>, RideError> {
        let mut rides = self.collect(|r| r.passenger_id == passenger_id).await;
        rides.sort_by_key(|r| r.created_at);
        Ok(rides)
    }

    async fn list_awaiting_response(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<RideRequest>, RideError> {
        let mut rides = self
            .collect(|r| r.vehicle_id == Some(vehicle_id) && r.status == RideStatus::Reserved)
            .await;
        rides.sort_by_key(|r| r.created_at);
        Ok(rides)
    }

    async fn list_active_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<RideRequest>, RideError> {
        Ok(self
            .collect(|r| {
                r.vehicle_id == Some(vehicle_id)
                    && matches!(r.status, RideStatus::Accepted | RideStatus::EnRoute)
            })
            .await)
    }

    async fn list_stale(&self, now: DateTime<Utc>) -> Result<Vec<RideRequest>, RideError> {
        Ok(self.collect(|r| r.is_stale(now)).await)
    }

    async fn append_position(&self, position: &RidePosition) -> Result<(), RideError> {
        let mut positions = self.positions.lock().await;
        positions
            .entry(position.ride_id)
            .or_default()
            .push(position.clone());
        Ok(())
    }

    async fn route(&self, ride_id: Uuid) -> Result<Vec<RidePosition>, RideError> {
        let positions = self.positions.lock().await;
        Ok(positions.get(&ride_id).cloned().unwrap_or_default())
    }
}
