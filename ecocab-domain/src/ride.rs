use chrono::{DateTime, Duration, Utc};
use ecocab_shared::Coordinates;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ride lifecycle states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    /// No vehicle attached, or awaiting re-match.
    Pending,
    /// A vehicle is holding seats, driver has not answered yet.
    Reserved,
    Accepted,
    EnRoute,
    Completed,
    Cancelled,
    Rejected,
    Expired,
}

impl RideStatus {
    /// Terminal states admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RideStatus::Completed | RideStatus::Cancelled | RideStatus::Rejected | RideStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Pending => "pending",
            RideStatus::Reserved => "reserved",
            RideStatus::Accepted => "accepted",
            RideStatus::EnRoute => "en_route",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
            RideStatus::Rejected => "rejected",
            RideStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RideStatus::Pending),
            "reserved" => Some(RideStatus::Reserved),
            "accepted" => Some(RideStatus::Accepted),
            "en_route" => Some(RideStatus::EnRoute),
            "completed" => Some(RideStatus::Completed),
            "cancelled" => Some(RideStatus::Cancelled),
            "rejected" => Some(RideStatus::Rejected),
            "expired" => Some(RideStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for RideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Driver or passenger actions that move a ride through its lifecycle.
///
/// Expiry is not an event: the sweeper re-dispatches stale rides directly
/// under the same compare-and-set used here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RideEvent {
    Accept,
    Start,
    Reject,
    Cancel,
    Complete,
}

impl RideEvent {
    /// Legal-transition table. `None` means the event is illegal from `from`.
    ///
    /// `Reject` lands on `Pending` only transiently; the dispatch engine is
    /// re-invoked immediately afterwards.
    pub fn target(self, from: RideStatus) -> Option<RideStatus> {
        match (from, self) {
            (RideStatus::Reserved, RideEvent::Accept) => Some(RideStatus::Accepted),
            (RideStatus::Reserved, RideEvent::Reject) => Some(RideStatus::Pending),
            (RideStatus::Accepted, RideEvent::Start) => Some(RideStatus::EnRoute),
            (RideStatus::Pending, RideEvent::Cancel)
            | (RideStatus::Accepted, RideEvent::Cancel)
            | (RideStatus::EnRoute, RideEvent::Cancel) => Some(RideStatus::Cancelled),
            (RideStatus::EnRoute, RideEvent::Complete) => Some(RideStatus::Completed),
            _ => None,
        }
    }
}

/// One passenger trip, from request to a terminal state.
///
/// Invariant: while `vehicle_id` is set and the status is non-terminal, that
/// vehicle's capacity has been debited by exactly `seats_required` through
/// the reservation ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RideRequest {
    pub id: Uuid,
    pub passenger_id: Uuid,
    pub vehicle_id: Option<Uuid>,
    pub origin: Coordinates,
    pub destination: Coordinates,
    pub seats_required: u32,
    pub status: RideStatus,
    /// Vehicles that already rejected or timed out on this ride; never
    /// offered it again.
    pub excluded_vehicles: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Deadline of the current reservation window. Recomputed on every
    /// successful reserve.
    pub expires_at: DateTime<Utc>,
}

impl RideRequest {
    pub fn new(
        passenger_id: Uuid,
        origin: Coordinates,
        destination: Coordinates,
        seats_required: u32,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            passenger_id,
            vehicle_id: None,
            origin,
            destination,
            seats_required,
            status: RideStatus::Pending,
            excluded_vehicles: Vec::new(),
            created_at: now,
            expires_at: now + window,
        }
    }

    /// A ride is stale when its reservation window lapsed while it was still
    /// waiting on a vehicle or a driver response.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, RideStatus::Pending | RideStatus::Reserved) && self.expires_at <= now
    }
}

/// One point of a vehicle's track while serving a ride.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RidePosition {
    pub ride_id: Uuid,
    pub position: Coordinates,
    pub recorded_at: DateTime<Utc>,
}
