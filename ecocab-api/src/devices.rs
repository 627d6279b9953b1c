use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use ecocab_domain::{Device, RidePosition, VehicleStatus};
use ecocab_shared::Coordinates;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/devices", post(register_device))
        .route("/api/devices/{id}", get(get_device))
        .route("/api/devices/{id}", delete(remove_device))
        .route("/api/devices/{id}/location", patch(update_location))
        .route("/api/vehicles", get(list_vehicles))
        .route("/api/vehicles/{id}/seats", patch(update_seats))
        .route("/api/vehicles/{id}/status", patch(update_vehicle_status))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
enum RegisterRequest {
    Passenger {
        /// Client-supplied identity; generated when absent.
        id: Option<Uuid>,
        name: Option<String>,
    },
    Vehicle {
        id: Option<Uuid>,
        name: Option<String>,
        seats_total: u32,
    },
}

async fn register_device(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Device>), AppError> {
    let now = state.clock.now();
    let device = match req {
        RegisterRequest::Passenger { id, name } => {
            Device::passenger(id.unwrap_or_else(Uuid::new_v4), name, now)
        }
        RegisterRequest::Vehicle {
            id,
            name,
            seats_total,
        } => {
            if seats_total == 0 || seats_total > state.rules.max_seats {
                return Err(AppError::ValidationError(format!(
                    "seats_total must be between 1 and {}, got {}",
                    state.rules.max_seats, seats_total
                )));
            }
            Device::vehicle(id.unwrap_or_else(Uuid::new_v4), name, seats_total, now)
        }
    };

    state.registry.insert(device.clone()).await?;
    info!(device_id = %device.id, "device registered");
    Ok((StatusCode::CREATED, Json(device)))
}

async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Device>, AppError> {
    let device = state
        .registry
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("device not found: {id}")))?;
    Ok(Json(device))
}

async fn remove_device(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.registry.remove(id).await? {
        info!(device_id = %id, "device removed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFoundError(format!("device not found: {id}")))
    }
}

async fn update_location(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(position): Json<Coordinates>,
) -> Result<StatusCode, AppError> {
    state.registry.update_location(id, position).await?;

    // A vehicle ping while serving rides extends their track history.
    let device = state
        .registry
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("device not found: {id}")))?;
    if device.is_vehicle() {
        let recorded_at = state.clock.now();
        for ride in state.rides.list_active_for_vehicle(id).await? {
            state
                .rides
                .append_position(&RidePosition {
                    ride_id: ride.id,
                    position,
                    recorded_at,
                })
                .await?;
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn list_vehicles(
    State(state): State<AppState>,
) -> Result<Json<Vec<Device>>, AppError> {
    let vehicles = state.registry.list_vehicles().await?;
    Ok(Json(vehicles))
}

#[derive(Debug, Deserialize)]
struct SeatsUpdateRequest {
    seats_total: u32,
}

async fn update_seats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SeatsUpdateRequest>,
) -> Result<Json<Device>, AppError> {
    if req.seats_total == 0 || req.seats_total > state.rules.max_seats {
        return Err(AppError::ValidationError(format!(
            "seats_total must be between 1 and {}, got {}",
            state.rules.max_seats, req.seats_total
        )));
    }
    state.registry.set_seats_total(id, req.seats_total).await?;

    let device = state
        .registry
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("device not found: {id}")))?;
    Ok(Json(device))
}

#[derive(Debug, Deserialize)]
struct VehicleStatusRequest {
    status: String,
}

async fn update_vehicle_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<VehicleStatusRequest>,
) -> Result<Json<Device>, AppError> {
    let status = VehicleStatus::parse(&req.status).ok_or_else(|| {
        AppError::ValidationError(format!("unknown vehicle status '{}'", req.status))
    })?;
    // Drivers only toggle duty; `reserved` and `en_route` belong to the
    // dispatch engine.
    if !matches!(status, VehicleStatus::OffDuty | VehicleStatus::Waiting) {
        return Err(AppError::ValidationError(format!(
            "status '{status}' cannot be set directly"
        )));
    }

    state.registry.set_vehicle_status(id, status).await?;
    let device = state
        .registry
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("device not found: {id}")))?;
    Ok(Json(device))
}
