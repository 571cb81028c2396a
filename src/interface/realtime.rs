//! WebSocket sessions.
//!
//! Each connection is bound to the identity resolved from its connect-time
//! credential, registered with the hub, and fed events until it closes.

use crate::{
    hub::Connection,
    identity::bearer_token,
    interface::{protocol::ClientEvent, AppState},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::interval};
use tracing::{debug, info, warn};

const PING_INTERVAL: Duration = Duration::from_secs(30);

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = params
        .token
        .or_else(|| bearer_token(&headers).map(str::to_string));
    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, token: Option<String>) {
    let user = state.manager.bind_session(token.as_deref()).await;
    let (tx, mut rx) = mpsc::channel(state.client_buffer);
    let conn = Arc::new(Connection::new(user, tx));
    let hub = state.manager.hub().clone();
    let conn_id = hub.register(conn.clone());

    match &conn.user {
        Some(user) => info!("Connection {} bound to {}", conn_id, user),
        None => info!("Connection {} connected without identity", conn_id),
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    let send_task = tokio::spawn(async move {
        let mut ping = interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            let frame = tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => match serde_json::to_string(&event) {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            warn!("Failed to serialize {}: {}", event.name(), e);
                            continue;
                        }
                    },
                    None => break,
                },
                _ = ping.tick() => Message::Ping(Vec::new()),
            };
            if ws_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    // Events from one connection are handled strictly in arrival order.
    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Dropping non-UTF-8 frame from {}", conn_id);
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket error for {}: {}", conn_id, e);
                break;
            }
        };

        match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => state.manager.handle_client_event(&conn, event).await,
            Err(e) => warn!("Dropping malformed event from {}: {}", conn_id, e),
        }
    }

    hub.unregister(&conn_id);
    send_task.abort();
    info!("Connection {} closed", conn_id);
}
