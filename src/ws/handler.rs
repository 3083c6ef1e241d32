//! WebSocket entrypoint for the live status feed.
//!
//! Upgrades HTTP to WS, waits for the client's registration message, and
//! pumps broadcast events to the socket until either side closes.

use crate::core::types::{ClientMessage, StatusEvent};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<StatusEvent>();
    let connection_id = Uuid::new_v4();

    // Which user this connection registered as, shared with the teardown path.
    let registered: Arc<Mutex<Option<i64>>> = Arc::new(Mutex::new(None));

    // Forward broadcast events to the actual websocket.
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    warn!("failed to serialize status event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Receive from the websocket; the only expected client message is the
    // registration.
    let recv_registered = Arc::clone(&registered);
    let recv_channel = Arc::clone(&state.channel);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Register { user_id }) => {
                        recv_channel.register(user_id, connection_id, tx.clone());
                        *recv_registered.lock().unwrap() = Some(user_id);
                    }
                    Err(_) => warn!("ignoring invalid client message: {}", text.as_str()),
                },
                Message::Close(_) => break,
                _ => {} // binary, ping, pong
            }
        }
    });

    // If either task exits, abort the other.
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    match *registered.lock().unwrap() {
        Some(user_id) => state.channel.unregister(user_id, connection_id),
        None => debug!(%connection_id, "connection closed without registering"),
    }
}
