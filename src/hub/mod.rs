//! Hub module - Real-time registry broadcasts to subscribers

pub mod broadcast;
pub mod message;

pub use broadcast::{BroadcastHub, Subscription};
pub use message::{ClientMessage, ServerMessage};
