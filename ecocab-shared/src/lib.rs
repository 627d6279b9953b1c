pub mod geo;

pub use geo::{haversine_meters, Coordinates};
