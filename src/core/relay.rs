//! Request relay loop.
//!
//! Every inbound user message is answered by exactly one outbound event,
//! from its own task. Requests are not serialized against each other, so
//! replies can come back in any order.

use crate::core::chat::ChatRequest;
use crate::core::error::BridgeError;
use crate::core::events::{Outbound, OutboundEvent};
use crate::core::traits::EngineHandle;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

pub const SIMULATED_REPLY_PREFIX: &str = "(simulated) Echo: ";
pub const DEFAULT_SIMULATED_DELAY: Duration = Duration::from_millis(300);
pub const UNSERIALIZABLE_REPLY: &str = "<unserializable reply>";

#[derive(Clone)]
pub struct Relay {
    engine: Option<EngineHandle>,
    outbound: Outbound,
    simulated_delay: Duration,
}

impl Relay {
    pub fn new(engine: Option<EngineHandle>, outbound: Outbound, simulated_delay: Duration) -> Self {
        Self {
            engine,
            outbound,
            simulated_delay,
        }
    }

    /// Consumes inbound messages until the UI side of the channel closes.
    pub async fn run(self, mut inbound: mpsc::Receiver<String>) {
        while let Some(message) = inbound.recv().await {
            debug!("Received from UI (user): {message}");
            let relay = self.clone();
            tokio::spawn(async move { relay.handle(message).await });
        }
        info!("Inbound UI channel closed; relay stopped");
    }

    /// Answers a single user message.
    pub async fn handle(&self, message: String) {
        let Some(engine) = &self.engine else {
            warn!("Engine not initialized; sending simulated reply");
            tokio::time::sleep(self.simulated_delay).await;
            let event = OutboundEvent::Reply {
                text: format!("{SIMULATED_REPLY_PREFIX}{message}"),
                raw: None,
            };
            self.outbound.emit(&event).await;
            return;
        };

        let event = match engine
            .chat_completion(ChatRequest::for_user_message(message))
            .await
            .map_err(BridgeError::Completion)
        {
            Ok(reply) => reply_event(&reply),
            Err(e) => {
                error!("Error calling engine: {e}");
                OutboundEvent::error(e.to_string())
            }
        };

        self.outbound.emit(&event).await;
    }
}

/// Builds the `reply` event for a raw completion.
pub fn reply_event(reply: &Value) -> OutboundEvent {
    OutboundEvent::Reply {
        text: reply_text(reply),
        raw: Some(raw_text(reply)),
    }
}

/// The first choice's message content, or the whole reply as JSON.
pub fn reply_text(reply: &Value) -> String {
    reply
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| serde_json::to_string(reply).unwrap_or_else(|_| reply.to_string()))
}

/// Pretty-printed reply for display, falling back to plain conversion.
pub fn raw_text(reply: &Value) -> String {
    serde_json::to_string_pretty(reply)
        .ok()
        .or_else(|| Some(reply.to_string()).filter(|s| !s.is_empty()))
        .unwrap_or_else(|| UNSERIALIZABLE_REPLY.to_owned())
}
