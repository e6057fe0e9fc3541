use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::app::AppState;
use crate::rooms::{ClientEvent, ConnectionId, EventSender, RoomRegistry, ServerEvent};

/// Upgrade handler for `/ws`. Each accepted socket becomes one independent
/// session bound to the shared room registry.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| run_session(socket, registry))
}

/// Per-connection lifecycle
///
/// The socket is split in two: a writer task drains the connection's
/// outbound channel into the sink (preserving queue order), while this task
/// reads inbound frames and dispatches them to the registry. When the
/// transport closes, the connection is dropped from whatever rooms it
/// joined; no leave message exists in the protocol.
async fn run_session(socket: WebSocket, registry: Arc<RoomRegistry>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let conn = registry.connect();

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        let Message::Text(text) = frame else {
            continue;
        };
        handle_frame(&registry, conn, &tx, &text);
    }

    registry.disconnect(conn);
    drop(tx);
    let _ = writer.await;
}

/// Parse one inbound text frame and dispatch it. Unparseable frames are
/// logged and skipped; the peer gets no error back.
fn handle_frame(registry: &RoomRegistry, conn: ConnectionId, tx: &EventSender, text: &str) {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(ClientEvent::JoinRoom { room, user }) => {
            registry.join(&room, conn, tx.clone(), user);
        }
        Ok(ClientEvent::DataEdit { room, change }) => {
            registry.emit(&room, conn, ServerEvent::DataEdit { change });
        }
        Ok(ClientEvent::ChartEdit { room, chart }) => {
            registry.emit(&room, conn, ServerEvent::ChartEdit { chart });
        }
        Ok(ClientEvent::Presence { room, presence }) => {
            registry.emit(&room, conn, ServerEvent::Presence { presence });
        }
        Err(err) => {
            log::warn!("dropping unparseable collaboration frame: {err}");
        }
    }
}
