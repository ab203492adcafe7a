//! WebSocket handler for real-time score streaming

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::api::state::ApiState;

/// WebSocket upgrade handler
///
/// GET /api/v1/stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: ApiState) {
    info!("WebSocket client connected");

    let (mut sender, mut receiver) = socket.split();
    let mut events = state.publisher.subscribe();

    // Forward publisher events to the client
    let mut send_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Ok(text) = serde_json::to_string(&event)
                        && sender.send(Message::Text(text)).await.is_err()
                    {
                        debug!("WebSocket send failed, client disconnected");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client lagging, dropped {skipped} events");
                }
                Err(RecvError::Closed) => {
                    debug!("event channel closed");
                    break;
                }
            }
        }
    });

    // Incoming messages are only watched for close
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    info!("WebSocket client disconnected");
}
