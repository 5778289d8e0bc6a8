//! Registry module - Instance records and the authoritative registry

pub mod store;
pub mod types;

pub use store::{ServiceRegistry, Snapshot, StatusCounts};
pub use types::{InstanceStatus, ProbeApplied, RegisterRequest, ServiceInstance};
