//! Broadcast hub pushing registry snapshots to subscribers
//!
//! Each subscriber owns a bounded queue drained by a single writer (see
//! `api::ws`), so writes to one connection are always serialized. The hub
//! only ever enqueues. A subscriber whose queue is closed or full is
//! dropped without affecting delivery to anyone else.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BroadcastConfig;
use crate::error::{AppError, Result};
use crate::gateway::task::PeriodicTask;
use crate::hub::message::{ClientMessage, ServerMessage};
use crate::metrics::GatewayMetrics;
use crate::registry::ServiceRegistry;

/// Handle returned to a new subscriber
pub struct Subscription {
    pub id: Uuid,
    /// Serialized messages queued for this subscriber, in send order
    pub receiver: mpsc::Receiver<String>,
}

struct Subscribers {
    accepting: bool,
    queues: HashMap<Uuid, mpsc::Sender<String>>,
}

/// Set of live subscribers and the timer that feeds them
pub struct BroadcastHub {
    registry: Arc<ServiceRegistry>,
    metrics: Arc<GatewayMetrics>,
    subscribers: RwLock<Subscribers>,
    queue_capacity: usize,
    interval: Duration,
    task: Mutex<Option<PeriodicTask>>,
}

impl BroadcastHub {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        metrics: Arc<GatewayMetrics>,
        config: &BroadcastConfig,
    ) -> Self {
        Self {
            registry,
            metrics,
            subscribers: RwLock::new(Subscribers {
                accepting: true,
                queues: HashMap::new(),
            }),
            queue_capacity: config.queue_capacity.max(1),
            interval: config.interval(),
            task: Mutex::new(None),
        }
    }

    /// Add a subscriber. Its queue starts with a `service_list` message.
    pub fn subscribe(&self) -> Result<Subscription> {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let initial = encode(&ServerMessage::service_list(self.registry.list()))?;

        let mut subscribers = self.subscribers.write();
        if !subscribers.accepting {
            return Err(AppError::ShuttingDown);
        }

        sender
            .try_send(initial)
            .map_err(|e| AppError::Internal(format!("Failed to queue initial service list: {}", e)))?;

        let id = Uuid::new_v4();
        subscribers.queues.insert(id, sender);
        drop(subscribers);

        self.metrics.subscriber_connected();
        info!(client_id = %id, "Subscriber connected");

        Ok(Subscription { id, receiver })
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let removed = self.subscribers.write().queues.remove(&id).is_some();
        if removed {
            self.metrics.subscriber_disconnected();
            info!(client_id = %id, "Subscriber disconnected");
        }
        removed
    }

    /// Handle a text frame received from subscriber `id`
    pub fn handle_message(&self, id: Uuid, text: &str) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(client_id = %id, error = %e, "Ignoring unrecognized subscriber message");
                return;
            }
        };

        let reply = match message {
            ClientMessage::Ping => ServerMessage::pong(),
            ClientMessage::GetServices => ServerMessage::service_list(self.registry.list()),
        };
        self.send_to(id, &reply);
    }

    /// Queue `message` for one subscriber
    pub fn send_to(&self, id: Uuid, message: &ServerMessage) -> bool {
        let Some(sender) = self.subscribers.read().queues.get(&id).cloned() else {
            return false;
        };

        let text = match encode(message) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, kind = message.kind(), "Failed to encode message");
                return false;
            }
        };

        match sender.try_send(text) {
            Ok(()) => true,
            Err(e) => {
                self.drop_subscriber(id, &e);
                false
            }
        }
    }

    /// Push a `service_update` to every subscriber, returning how many accepted it
    pub fn broadcast_update(&self) -> usize {
        let message = ServerMessage::service_update(self.registry.list());
        let text = match encode(&message) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to encode service update");
                return 0;
            }
        };

        // Iterate over a copy so failures can be removed without holding the lock
        let targets: Vec<(Uuid, mpsc::Sender<String>)> = self
            .subscribers
            .read()
            .queues
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect();

        let mut delivered = 0;
        for (id, sender) in targets {
            match sender.try_send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => self.drop_subscriber(id, &e),
            }
        }

        debug!(delivered, "Broadcast service update");
        delivered
    }

    fn drop_subscriber(&self, id: Uuid, reason: &TrySendError<String>) {
        let reason = match reason {
            TrySendError::Full(_) => "send queue full",
            TrySendError::Closed(_) => "connection closed",
        };
        warn!(client_id = %id, reason, "Failed to send message to subscriber, removing");
        self.unsubscribe(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().queues.len()
    }

    pub fn is_accepting(&self) -> bool {
        self.subscribers.read().accepting
    }

    /// Start the periodic broadcast task
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let hub = self.clone();
        *task = Some(PeriodicTask::spawn("broadcast", self.interval, move || {
            let hub = hub.clone();
            async move {
                hub.broadcast_update();
            }
        }));
    }

    /// Stop the timer, refuse new subscribers and close every queue.
    ///
    /// Dropping a queue's sender ends its writer, which closes the connection.
    pub async fn close(&self, grace: Duration) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.stop(grace).await;
        }

        let closed: Vec<Uuid> = {
            let mut subscribers = self.subscribers.write();
            subscribers.accepting = false;
            subscribers.queues.drain().map(|(id, _)| id).collect()
        };
        for _ in &closed {
            self.metrics.subscriber_disconnected();
        }
        info!(closed = closed.len(), "Broadcast hub closed");
    }
}

fn encode(message: &ServerMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}
