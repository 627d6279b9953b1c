use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ecocab_domain::{RideError, RidePosition, RideRequest, RideStatus, RideStore};
use ecocab_shared::Coordinates;
use sqlx::PgPool;
use uuid::Uuid;

pub struct PgRideStore {
    pool: PgPool,
}

impl PgRideStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct RideRow {
    id: Uuid,
    passenger_id: Uuid,
    vehicle_id: Option<Uuid>,
    origin_lat: f64,
    origin_lon: f64,
    destination_lat: f64,
    destination_lon: f64,
    seats_required: i32,
    status: String,
    excluded_vehicles: Vec<Uuid>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl RideRow {
    fn into_ride(self) -> Result<RideRequest, RideError> {
        let status = RideStatus::parse(&self.status)
            .ok_or_else(|| RideError::Storage(format!("unknown ride status '{}'", self.status)))?;

        Ok(RideRequest {
            id: self.id,
            passenger_id: self.passenger_id,
            vehicle_id: self.vehicle_id,
            origin: Coordinates::new(self.origin_lat, self.origin_lon),
            destination: Coordinates::new(self.destination_lat, self.destination_lon),
            seats_required: self.seats_required as u32,
            status,
            excluded_vehicles: self.excluded_vehicles,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PositionRow {
    ride_id: Uuid,
    latitude: f64,
    longitude: f64,
    recorded_at: DateTime<Utc>,
}

const RIDE_COLUMNS: &str = "id, passenger_id, vehicle_id, origin_lat, origin_lon, \
     destination_lat, destination_lon, seats_required, status, excluded_vehicles, \
     created_at, expires_at";

fn storage(e: sqlx::Error) -> RideError {
    RideError::Storage(e.to_string())
}

#[async_trait]
impl RideStore for PgRideStore {
    async fn insert(&self, ride: &RideRequest) -> Result<(), RideError> {
        sqlx::query(
            r#"
            INSERT INTO ride_requests
                (id, passenger_id, vehicle_id, origin_lat, origin_lon,
                 destination_lat, destination_lon, seats_required, status,
                 excluded_vehicles, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(ride.id)
        .bind(ride.passenger_id)
        .bind(ride.vehicle_id)
        .bind(ride.origin.latitude)
        .bind(ride.origin.longitude)
        .bind(ride.destination.latitude)
        .bind(ride.destination.longitude)
        .bind(ride.seats_required as i32)
        .bind(ride.status.as_str())
        .bind(&ride.excluded_vehicles)
        .bind(ride.created_at)
        .bind(ride.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            // The partial unique index turns a lost check-then-insert race
            // into a clean conflict.
            if let sqlx::Error::Database(db) = &e {
                if db.constraint() == Some("idx_one_open_ride_per_passenger") {
                    return RideError::OpenRideExists(ride.passenger_id);
                }
            }
            storage(e)
        })?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<RideRequest>, RideError> {
        let row: Option<RideRow> = sqlx::query_as(&format!(
            "SELECT {RIDE_COLUMNS} FROM ride_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(RideRow::into_ride).transpose()
    }

    async fn update_if_status(
        &self,
        ride: &RideRequest,
        expected: RideStatus,
    ) -> Result<bool, RideError> {
        // The status guard in the WHERE clause is the whole concurrency
        // story: a writer that lost the race affects zero rows.
        let result = sqlx::query(
            r#"
            UPDATE ride_requests
            SET vehicle_id = $2,
                status = $3,
                excluded_vehicles = $4,
                expires_at = $5
            WHERE id = $1 AND status = $6
            "#,
        )
        .bind(ride.id)
        .bind(ride.vehicle_id)
        .bind(ride.status.as_str())
        .bind(&ride.excluded_vehicles)
        .bind(ride.expires_at)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() == 1)
    }

    async fn has_open_ride(&self, passenger_id: Uuid) -> Result<bool, RideError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM ride_requests
                WHERE passenger_id = $1
                  AND status IN ('pending', 'reserved', 'accepted', 'en_route')
            )
            "#,
        )
        .bind(passenger_id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        Ok(exists)
    }

    async fn list_for_passenger(&self, passenger_id: Uuid) -> Result<Vec<RideRequest>, RideError> {
        let rows: Vec<RideRow> = sqlx::query_as(&format!(
            "SELECT {RIDE_COLUMNS} FROM ride_requests WHERE passenger_id = $1 ORDER BY created_at"
        ))
        .bind(passenger_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(RideRow::into_ride).collect()
    }

    async fn list_awaiting_response(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<RideRequest>, RideError> {
        let rows: Vec<RideRow> = sqlx::query_as(&format!(
            "SELECT {RIDE_COLUMNS} FROM ride_requests \
             WHERE vehicle_id = $1 AND status = 'reserved' ORDER BY created_at"
        ))
        .bind(vehicle_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(RideRow::into_ride).collect()
    }

    async fn list_active_for_vehicle(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Vec<RideRequest>, RideError> {
        let rows: Vec<RideRow> = sqlx::query_as(&format!(
            "SELECT {RIDE_COLUMNS} FROM ride_requests \
             WHERE vehicle_id = $1 AND status IN ('accepted', 'en_route') ORDER BY created_at"
        ))
        .bind(vehicle_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(RideRow::into_ride).collect()
    }

    async fn list_stale(&self, now: DateTime<Utc>) -> Result<Vec<RideRequest>, RideError> {
        let rows: Vec<RideRow> = sqlx::query_as(&format!(
            "SELECT {RIDE_COLUMNS} FROM ride_requests \
             WHERE status IN ('pending', 'reserved') AND expires_at <= $1 ORDER BY expires_at"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(RideRow::into_ride).collect()
    }

    async fn append_position(&self, position: &RidePosition) -> Result<(), RideError> {
        sqlx::query(
            "INSERT INTO ride_positions (ride_id, latitude, longitude, recorded_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(position.ride_id)
        .bind(position.position.latitude)
        .bind(position.position.longitude)
        .bind(position.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    async fn route(&self, ride_id: Uuid) -> Result<Vec<RidePosition>, RideError> {
        let rows: Vec<PositionRow> = sqlx::query_as(
            "SELECT ride_id, latitude, longitude, recorded_at FROM ride_positions \
             WHERE ride_id = $1 ORDER BY recorded_at, id",
        )
        .bind(ride_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(rows
            .into_iter()
            .map(|r| RidePosition {
                ride_id: r.ride_id,
                position: Coordinates::new(r.latitude, r.longitude),
                recorded_at: r.recorded_at,
            })
            .collect())
    }
}
