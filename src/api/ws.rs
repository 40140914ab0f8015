//! WebSocket session carrying the two UI channels.
//!
//! Text frames from the browser are user messages; text frames to the
//! browser are serialized outbound events.

use crate::api::{AppState, SessionLease};
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use tokio::sync::mpsc;

pub async fn connect(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let Some(lease) = state.lease() else {
        return (StatusCode::CONFLICT, "a UI session is already attached").into_response();
    };
    let to_bridge = state.to_bridge();

    ws.on_upgrade(move |socket| session(socket, to_bridge, lease))
}

async fn session(socket: WebSocket, to_bridge: mpsc::Sender<String>, mut lease: SessionLease) {
    info!("UI session attached");
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            payload = lease.recv() => match payload {
                Some(payload) => {
                    if sink.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if to_bridge.send(text).await.is_err() {
                        warn!("Bridge stopped; closing UI session");
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("UI socket error: {e}");
                    break;
                }
            },
        }
    }

    info!("UI session detached");
}
