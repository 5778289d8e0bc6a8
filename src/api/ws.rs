//! WebSocket bridge between a client connection and the broadcast hub

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::hub::Subscription;
use crate::AppState;

/// `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if !state.hub.is_accepting() {
        return AppError::ShuttingDown.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let Subscription { id, mut receiver } = match state.hub.subscribe() {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(error = %e, "Subscription refused");
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();

    // Sole writer for this connection
    let mut writer = tokio::spawn(async move {
        while let Some(text) = receiver.recv().await {
            if let Err(e) = sink.send(Message::Text(text)).await {
                warn!(client_id = %id, error = %e, "Failed to send message to subscriber, removing");
                return;
            }
        }
        // Hub dropped the queue
        let _ = sink.send(Message::Close(None)).await;
    });

    let hub = state.hub.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => hub.handle_message(id, &text),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(client_id = %id, error = %e, "WebSocket read failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state.hub.unsubscribe(id);
}
