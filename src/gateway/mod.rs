//! Gateway module - Health checking, load balancing, and proxying

pub mod health_check;
pub mod load_balancer;
pub mod proxy;
pub mod task;
