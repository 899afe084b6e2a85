//! WebSocket transport for client events.

use super::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use relay_core::{ClientEvent, EventReceiver, RelayError};
use tracing::{debug, info, warn};

/// Upgrade `GET /ws` to an event socket.
pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: AppState) {
    let gateway = state.gateway.clone();
    let (id, outbox) = gateway.connect();
    let (sender, mut receiver) = socket.split();

    info!(connection = %id, "WebSocket connected");

    let writer = tokio::spawn(write_events(sender, outbox));

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match ClientEvent::parse(&text) {
                Ok(event) => gateway.handle(id, event).await,
                Err(e) => gateway.reject(id, &e),
            },
            Ok(Message::Binary(_)) => {
                gateway.reject(id, &RelayError::MalformedEvent("expected a text frame".into()))
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                debug!(connection = %id, error = %e, "WebSocket read failed");
                break;
            }
        }
    }

    gateway.disconnect(id).await;
    if let Err(e) = writer.await {
        warn!(connection = %id, error = %e, "WebSocket writer task failed");
    }

    info!(connection = %id, "WebSocket closed");
}

/// Drain the connection outbox onto the socket until either side closes.
async fn write_events(
    mut sender: futures::stream::SplitSink<WebSocket, Message>,
    mut outbox: EventReceiver,
) {
    while let Some(event) = outbox.recv().await {
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                warn!(event = event.name(), error = %e, "Failed to encode event");
                continue;
            }
        };

        if sender.send(Message::Text(text)).await.is_err() {
            break;
        }
    }

    let _ = sender.close().await;
}
