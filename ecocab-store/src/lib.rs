pub mod app_config;
pub mod database;
pub mod device_repo;
pub mod memory;
pub mod ride_repo;

pub use app_config::Config;
pub use database::DbClient;
pub use device_repo::PgDeviceRegistry;
pub use memory::{MemoryDeviceRegistry, MemoryRideStore};
pub use ride_repo::PgRideStore;
