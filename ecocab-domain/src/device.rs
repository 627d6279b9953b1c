use chrono::{DateTime, Utc};
use ecocab_shared::Coordinates;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Availability of a vehicle. Meaningless for passengers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    OffDuty,
    Waiting,
    Reserved,
    EnRoute,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::OffDuty => "off_duty",
            VehicleStatus::Waiting => "waiting",
            VehicleStatus::Reserved => "reserved",
            VehicleStatus::EnRoute => "en_route",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off_duty" => Some(VehicleStatus::OffDuty),
            "waiting" => Some(VehicleStatus::Waiting),
            "reserved" => Some(VehicleStatus::Reserved),
            "en_route" => Some(VehicleStatus::EnRoute),
            _ => None,
        }
    }
}

impl std::fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role-specific half of a device record.
///
/// Passenger and vehicle share identity and location but only vehicles carry
/// seat accounting, so the role is a tagged variant rather than a record full
/// of nullable fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum DeviceKind {
    Passenger,
    Vehicle {
        status: VehicleStatus,
        seats_available: u32,
        seats_total: u32,
    },
}

/// A registered device: one passenger phone or one vehicle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: Uuid,
    pub name: Option<String>,
    /// Last reported position. A vehicle without one is never matched.
    pub location: Option<Coordinates>,
    #[serde(flatten)]
    pub kind: DeviceKind,
    pub registered_at: DateTime<Utc>,
}

impl Device {
    pub fn passenger(id: Uuid, name: Option<String>, registered_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name,
            location: None,
            kind: DeviceKind::Passenger,
            registered_at,
        }
    }

    pub fn vehicle(
        id: Uuid,
        name: Option<String>,
        seats_total: u32,
        registered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            location: None,
            kind: DeviceKind::Vehicle {
                status: VehicleStatus::Waiting,
                seats_available: seats_total,
                seats_total,
            },
            registered_at,
        }
    }

    pub fn is_vehicle(&self) -> bool {
        matches!(self.kind, DeviceKind::Vehicle { .. })
    }

    pub fn vehicle_status(&self) -> Option<VehicleStatus> {
        match self.kind {
            DeviceKind::Vehicle { status, .. } => Some(status),
            DeviceKind::Passenger => None,
        }
    }

    pub fn seats_available(&self) -> Option<u32> {
        match self.kind {
            DeviceKind::Vehicle {
                seats_available, ..
            } => Some(seats_available),
            DeviceKind::Passenger => None,
        }
    }
}

/// Projection of an eligible vehicle produced by a candidate scan.
#[derive(Debug, Clone)]
pub struct VehicleCandidate {
    pub id: Uuid,
    pub location: Coordinates,
    pub seats_available: u32,
}
