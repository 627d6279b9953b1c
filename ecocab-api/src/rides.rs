use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Duration;
use ecocab_dispatch::DispatchOutcome;
use ecocab_domain::{RideError, RideEvent, RidePosition, RideRequest, RideStatus};
use ecocab_shared::Coordinates;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/rides", post(create_ride))
        .route("/api/rides/{id}", get(get_ride))
        .route("/api/rides/{id}/status", patch(update_status))
        .route("/api/rides/{id}/route", get(get_route))
        .route("/api/passengers/{id}/rides", get(passenger_rides))
        .route("/api/vehicles/{id}/queue", get(vehicle_queue))
}

#[derive(Debug, Deserialize)]
struct CreateRideRequest {
    passenger_id: Uuid,
    origin: Coordinates,
    destination: Coordinates,
    seats_required: u32,
}

#[derive(Debug, Serialize)]
struct RideResponse {
    #[serde(flatten)]
    ride: RideRequest,
    /// Whether a vehicle could be reserved right away.
    matched: bool,
}

async fn create_ride(
    State(state): State<AppState>,
    Json(req): Json<CreateRideRequest>,
) -> Result<(StatusCode, Json<RideResponse>), AppError> {
    if req.seats_required == 0 || req.seats_required > state.rules.max_seats {
        return Err(RideError::InvalidSeats {
            got: req.seats_required,
            max: state.rules.max_seats,
        }
        .into());
    }

    let requester = state
        .registry
        .get(req.passenger_id)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("device not found: {}", req.passenger_id)))?;
    if requester.is_vehicle() {
        return Err(AppError::ValidationError(
            "only passenger devices can request rides".to_string(),
        ));
    }

    // One open ride per passenger.
    if state.rides.has_open_ride(req.passenger_id).await? {
        return Err(RideError::OpenRideExists(req.passenger_id).into());
    }

    let window = Duration::seconds(state.rules.reservation_window_secs as i64);
    let mut ride = RideRequest::new(
        req.passenger_id,
        req.origin,
        req.destination,
        req.seats_required,
        state.clock.now(),
        window,
    );
    state.rides.insert(&ride).await?;

    let outcome = state.engine.dispatch(&mut ride).await?;
    let matched = matches!(outcome, DispatchOutcome::Assigned { .. });
    info!(ride_id = %ride.id, matched, "ride created");

    Ok((StatusCode::CREATED, Json(RideResponse { ride, matched })))
}

async fn get_ride(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RideRequest>, AppError> {
    // fetch() expires or re-dispatches a stale row before returning it.
    let ride = state.lifecycle.fetch(id).await?;
    Ok(Json(ride))
}

#[derive(Debug, Deserialize)]
struct StatusUpdateRequest {
    status: String,
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<RideRequest>, AppError> {
    let requested = RideStatus::parse(&req.status).ok_or_else(|| {
        AppError::ValidationError(format!("unknown ride status '{}'", req.status))
    })?;
    let event = event_for(requested).ok_or_else(|| {
        AppError::ValidationError(format!("status '{requested}' cannot be requested"))
    })?;

    let ride = state.lifecycle.apply(id, event).await?;
    Ok(Json(ride))
}

/// The event a caller means when asking for a target status. `pending`,
/// `reserved` and `expired` are engine-owned and cannot be requested.
fn event_for(status: RideStatus) -> Option<RideEvent> {
    match status {
        RideStatus::Accepted => Some(RideEvent::Accept),
        RideStatus::EnRoute => Some(RideEvent::Start),
        RideStatus::Rejected => Some(RideEvent::Reject),
        RideStatus::Cancelled => Some(RideEvent::Cancel),
        RideStatus::Completed => Some(RideEvent::Complete),
        RideStatus::Pending | RideStatus::Reserved | RideStatus::Expired => None,
    }
}

async fn get_route(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RidePosition>>, AppError> {
    if state.rides.get(id).await?.is_none() {
        return Err(RideError::RideNotFound(id).into());
    }
    let route = state.rides.route(id).await?;
    Ok(Json(route))
}

async fn passenger_rides(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RideRequest>>, AppError> {
    let rides = state.rides.list_for_passenger(id).await?;
    Ok(Json(rides))
}

/// The driver's work queue: reservations awaiting an answer plus rides
/// currently being served.
async fn vehicle_queue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let awaiting = state.rides.list_awaiting_response(id).await?;
    let active = state.rides.list_active_for_vehicle(id).await?;
    Ok(Json(json!({
        "awaiting_response": awaiting,
        "active": active,
    })))
}
