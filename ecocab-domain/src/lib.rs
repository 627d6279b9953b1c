pub mod clock;
pub mod device;
pub mod repository;
pub mod ride;

pub use clock::{Clock, ManualClock, SystemClock};
pub use device::{Device, DeviceKind, VehicleCandidate, VehicleStatus};
pub use repository::{CandidateFilter, DeviceRegistry, RegistryError, RideError, RideStore};
pub use ride::{RideEvent, RidePosition, RideRequest, RideStatus};
