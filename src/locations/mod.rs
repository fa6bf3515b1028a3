pub mod service;

pub use service::{AssignmentRequest, CapacityUpdate, LocationCapacity, LocationService, NewLocation, ResourceInput};
