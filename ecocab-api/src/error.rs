use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ecocab_domain::{RegistryError, RideError};
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    ValidationError(String),
    NotFoundError(String),
    ConflictError(String),
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DeviceNotFound(_) => AppError::NotFoundError(err.to_string()),
            RegistryError::NotAVehicle(_) => AppError::ValidationError(err.to_string()),
            RegistryError::InsufficientCapacity { .. }
            | RegistryError::VehicleUnavailable { .. }
            | RegistryError::ReservationsHeld { .. } => AppError::ConflictError(err.to_string()),
            RegistryError::Storage(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl From<RideError> for AppError {
    fn from(err: RideError) -> Self {
        match err {
            RideError::RideNotFound(_) => AppError::NotFoundError(err.to_string()),
            RideError::InvalidSeats { .. } => AppError::ValidationError(err.to_string()),
            RideError::InvalidTransition { .. }
            | RideError::OpenRideExists(_)
            | RideError::ConcurrencyConflict(_) => AppError::ConflictError(err.to_string()),
            RideError::Registry(inner) => inner.into(),
            RideError::Storage(msg) => AppError::InternalServerError(msg),
        }
    }
}
