use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ecocab_domain::{
    CandidateFilter, Device, DeviceKind, DeviceRegistry, RegistryError, VehicleCandidate,
    VehicleStatus,
};
use ecocab_shared::Coordinates;
use sqlx::PgPool;
use uuid::Uuid;

pub struct PgDeviceRegistry {
    pool: PgPool,
}

impl PgDeviceRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: Uuid,
    role: String,
    name: Option<String>,
    status: String,
    seats_available: i32,
    seats_total: i32,
    latitude: Option<f64>,
    longitude: Option<f64>,
    registered_at: DateTime<Utc>,
}

impl DeviceRow {
    fn into_device(self) -> Result<Device, RegistryError> {
        let kind = match self.role.as_str() {
            "passenger" => DeviceKind::Passenger,
            "vehicle" => {
                let status = VehicleStatus::parse(&self.status).ok_or_else(|| {
                    RegistryError::Storage(format!("unknown vehicle status '{}'", self.status))
                })?;
                DeviceKind::Vehicle {
                    status,
                    seats_available: self.seats_available as u32,
                    seats_total: self.seats_total as u32,
                }
            }
            other => {
                return Err(RegistryError::Storage(format!(
                    "unknown device role '{other}'"
                )))
            }
        };

        let location = match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)),
            _ => None,
        };

        Ok(Device {
            id: self.id,
            name: self.name,
            location,
            kind,
            registered_at: self.registered_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CandidateRow {
    id: Uuid,
    latitude: f64,
    longitude: f64,
    seats_available: i32,
}

const DEVICE_COLUMNS: &str =
    "id, role, name, status, seats_available, seats_total, latitude, longitude, registered_at";

fn storage(e: sqlx::Error) -> RegistryError {
    RegistryError::Storage(e.to_string())
}

#[async_trait]
impl DeviceRegistry for PgDeviceRegistry {
    async fn insert(&self, device: Device) -> Result<(), RegistryError> {
        let (role, status, seats_available, seats_total) = match device.kind {
            DeviceKind::Passenger => ("passenger", VehicleStatus::Waiting.as_str(), 0i32, 0i32),
            DeviceKind::Vehicle {
                status,
                seats_available,
                seats_total,
            } => (
                "vehicle",
                status.as_str(),
                seats_available as i32,
                seats_total as i32,
            ),
        };

        // Re-registering a device overwrites the record but keeps its place
        // in registration order. A vehicle with seats held cannot be
        // overwritten, so the row is locked for the check.
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let existing: Option<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1 FOR UPDATE"
        ))
        .bind(device.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?;

        if let Some(existing) = existing {
            if existing.role == "vehicle" {
                let held =
                    (existing.seats_total as u32).saturating_sub(existing.seats_available as u32);
                if held > 0 {
                    return Err(RegistryError::ReservationsHeld {
                        vehicle_id: device.id,
                        held,
                    });
                }
            }
        }

        sqlx::query(
            r#"
            INSERT INTO devices (id, role, name, status, seats_available, seats_total, latitude, longitude, registered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                role = EXCLUDED.role,
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                seats_available = EXCLUDED.seats_available,
                seats_total = EXCLUDED.seats_total,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude
            "#,
        )
        .bind(device.id)
        .bind(role)
        .bind(&device.name)
        .bind(status)
        .bind(seats_available)
        .bind(seats_total)
        .bind(device.location.map(|c| c.latitude))
        .bind(device.location.map(|c| c.longitude))
        .bind(device.registered_at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Device>, RegistryError> {
        let row: Option<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(DeviceRow::into_device).transpose()
    }

    async fn remove(&self, id: Uuid) -> Result<bool, RegistryError> {
        let result = sqlx::query("DELETE FROM devices WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_vehicles(&self) -> Result<Vec<Device>, RegistryError> {
        let rows: Vec<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE role = 'vehicle' ORDER BY registered_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(DeviceRow::into_device).collect()
    }

    async fn find_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<VehicleCandidate>, RegistryError> {
        // SKIP LOCKED steps over vehicles mid-reserve instead of waiting on
        // them; the ledger re-checks the chosen row under FOR UPDATE anyway.
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let rows: Vec<CandidateRow> = sqlx::query_as(
            r#"
            SELECT id, latitude, longitude, seats_available
            FROM devices
            WHERE role = 'vehicle'
              AND status = 'waiting'
              AND latitude IS NOT NULL
              AND longitude IS NOT NULL
              AND seats_available >= $1
              AND NOT (id = ANY($2))
            ORDER BY registered_at
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(filter.seats_required as i32)
        .bind(&filter.exclude)
        .fetch_all(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;

        Ok(rows
            .into_iter()
            .map(|r| VehicleCandidate {
                id: r.id,
                location: Coordinates::new(r.latitude, r.longitude),
                seats_available: r.seats_available as u32,
            })
            .collect())
    }

    async fn reserve(&self, vehicle_id: Uuid, seats: u32) -> Result<(), RegistryError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row: Option<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1 FOR UPDATE"
        ))
        .bind(vehicle_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?;

        let row = row.ok_or(RegistryError::DeviceNotFound(vehicle_id))?;
        if row.role != "vehicle" {
            return Err(RegistryError::NotAVehicle(vehicle_id));
        }
        let status = VehicleStatus::parse(&row.status).ok_or_else(|| {
            RegistryError::Storage(format!("unknown vehicle status '{}'", row.status))
        })?;
        if status != VehicleStatus::Waiting {
            return Err(RegistryError::VehicleUnavailable { vehicle_id, status });
        }
        let available = row.seats_available as u32;
        if available < seats {
            return Err(RegistryError::InsufficientCapacity {
                vehicle_id,
                requested: seats,
                available,
            });
        }

        sqlx::query(
            "UPDATE devices SET seats_available = seats_available - $2, status = 'reserved' WHERE id = $1",
        )
        .bind(vehicle_id)
        .bind(seats as i32)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)
    }

    async fn release(&self, vehicle_id: Uuid, seats: u32) -> Result<(), RegistryError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row: Option<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1 FOR UPDATE"
        ))
        .bind(vehicle_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?;

        let row = row.ok_or(RegistryError::DeviceNotFound(vehicle_id))?;
        if row.role != "vehicle" {
            return Err(RegistryError::NotAVehicle(vehicle_id));
        }

        let credited = (row.seats_available as u32 + seats).min(row.seats_total as u32);

        sqlx::query("UPDATE devices SET seats_available = $2, status = 'waiting' WHERE id = $1")
            .bind(vehicle_id)
            .bind(credited as i32)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)
    }

    async fn set_vehicle_status(
        &self,
        vehicle_id: Uuid,
        status: VehicleStatus,
    ) -> Result<(), RegistryError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row: Option<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1 FOR UPDATE"
        ))
        .bind(vehicle_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?;

        let row = row.ok_or(RegistryError::DeviceNotFound(vehicle_id))?;
        if row.role != "vehicle" {
            return Err(RegistryError::NotAVehicle(vehicle_id));
        }
        // Back to `waiting` means matchable again; only the ledger's release
        // may do that while seats are held.
        let held = (row.seats_total as u32).saturating_sub(row.seats_available as u32);
        if status == VehicleStatus::Waiting && held > 0 {
            return Err(RegistryError::ReservationsHeld { vehicle_id, held });
        }

        sqlx::query("UPDATE devices SET status = $2 WHERE id = $1")
            .bind(vehicle_id)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)
    }

    async fn set_seats_total(
        &self,
        vehicle_id: Uuid,
        seats_total: u32,
    ) -> Result<(), RegistryError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let row: Option<DeviceRow> = sqlx::query_as(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = $1 FOR UPDATE"
        ))
        .bind(vehicle_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?;

        let row = row.ok_or(RegistryError::DeviceNotFound(vehicle_id))?;
        if row.role != "vehicle" {
            return Err(RegistryError::NotAVehicle(vehicle_id));
        }

        // Seats held by live rides survive the resize.
        let held = (row.seats_total as u32).saturating_sub(row.seats_available as u32);
        let available = seats_total.saturating_sub(held);

        sqlx::query("UPDATE devices SET seats_total = $2, seats_available = $3 WHERE id = $1")
            .bind(vehicle_id)
            .bind(seats_total as i32)
            .bind(available as i32)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)
    }

    async fn update_location(&self, id: Uuid, location: Coordinates) -> Result<(), RegistryError> {
        let result = sqlx::query("UPDATE devices SET latitude = $2, longitude = $3 WHERE id = $1")
            .bind(id)
            .bind(location.latitude)
            .bind(location.longitude)
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::DeviceNotFound(id));
        }
        Ok(())
    }
}
