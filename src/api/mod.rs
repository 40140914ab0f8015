//! HTTP surface: the chat page and the UI channel socket.

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::response::Html;
use axum::routing::get;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

pub mod ws;

/// The UI's ends of the bridge channels, shared by every connection.
///
/// The outbound receiver can only be held by one session at a time.
#[derive(Clone)]
pub struct AppState {
    to_bridge: mpsc::Sender<String>,
    from_bridge: Arc<Mutex<Option<mpsc::Receiver<String>>>>,
}

impl AppState {
    pub fn new(to_bridge: mpsc::Sender<String>, from_bridge: mpsc::Receiver<String>) -> Self {
        Self {
            to_bridge,
            from_bridge: Arc::new(Mutex::new(Some(from_bridge))),
        }
    }

    /// Takes the outbound receiver for a session, or `None` if another
    /// session already holds it.
    pub fn lease(&self) -> Option<SessionLease> {
        let receiver = self.from_bridge.lock().ok()?.take()?;
        Some(SessionLease {
            receiver: Some(receiver),
            slot: self.from_bridge.clone(),
        })
    }

    pub fn to_bridge(&self) -> mpsc::Sender<String> {
        self.to_bridge.clone()
    }
}

/// Exclusive access to the outbound channel; handed back on drop.
pub struct SessionLease {
    receiver: Option<mpsc::Receiver<String>>,
    slot: Arc<Mutex<Option<mpsc::Receiver<String>>>>,
}

impl SessionLease {
    pub async fn recv(&mut self) -> Option<String> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.recv().await,
            None => None,
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let (Some(receiver), Ok(mut slot)) = (self.receiver.take(), self.slot.lock()) {
            *slot = Some(receiver);
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws::connect))
        .nest_service(
            "/static",
            ServiceBuilder::new().service(ServeDir::new("static")),
        )
        .layer(
            CorsLayer::new()
                .allow_headers(Any)
                .allow_methods([Method::GET])
                .allow_origin([
                    HeaderValue::from_static("http://localhost:3000"),
                    HeaderValue::from_static("http://localhost:5173"),
                ]),
        )
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../../static/index.html"))
}
