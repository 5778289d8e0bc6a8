//! API module - HTTP routes, handlers, and the subscription endpoint

pub mod handlers;
pub mod routes;
pub mod ws;

pub use routes::create_router;
