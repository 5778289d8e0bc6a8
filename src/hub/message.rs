//! Messages exchanged with subscribers
//!
//! Every message is a JSON object tagged by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::Snapshot;

/// Message sent from the hub to a subscriber
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full registry contents, sent on connect and on request
    ServiceList { services: Snapshot },
    /// Full registry contents pushed on the broadcast timer
    ServiceUpdate {
        services: Snapshot,
        timestamp: DateTime<Utc>,
    },
    Pong { timestamp: DateTime<Utc> },
}

impl ServerMessage {
    pub fn service_list(services: Snapshot) -> Self {
        ServerMessage::ServiceList { services }
    }

    pub fn service_update(services: Snapshot) -> Self {
        ServerMessage::ServiceUpdate {
            services,
            timestamp: Utc::now(),
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong {
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ServiceList { .. } => "service_list",
            ServerMessage::ServiceUpdate { .. } => "service_update",
            ServerMessage::Pong { .. } => "pong",
        }
    }
}

/// Message sent from a subscriber to the hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    GetServices,
}
