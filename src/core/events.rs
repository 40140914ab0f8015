//! Events exchanged with the UI and the channel pair that carries them.
//!

use crate::core::error::BridgeError;
use async_stream::stream;
use futures_util::Stream;
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Capacity of the in-process UI channels.
pub const CHANNEL_CAPACITY: usize = 1000;

/// Intermediate model load progress, forwarded verbatim to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    /// Seconds since loading started.
    pub time_elapsed: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundEvent {
    Error {
        message: String,
    },
    Progress {
        data: ProgressReport,
    },
    Ready {
        model: String,
    },
    Reply {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
}

impl OutboundEvent {
    pub fn error(message: impl Into<String>) -> Self {
        OutboundEvent::Error {
            message: message.into(),
        }
    }

    /// Serializes the event into the text payload sent to the UI.
    pub fn to_payload(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(BridgeError::Serialization)
    }

    pub fn from_payload(payload: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(payload).map_err(BridgeError::Serialization)
    }
}

/// Sending half of the UI channel.
#[derive(Debug, Clone)]
pub struct Outbound {
    sender: mpsc::Sender<String>,
}

impl Outbound {
    pub fn new(sender: mpsc::Sender<String>) -> Self {
        Self { sender }
    }

    /// Sends an event to the UI.
    ///
    /// Failures are logged and the event is dropped.
    pub async fn emit(&self, event: &OutboundEvent) {
        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("dropping outbound event: {e}");
                return;
            }
        };

        if self.sender.send(payload).await.is_err() {
            warn!("UI channel closed; dropping {event:?}");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// The two UI channels injected into the bridge.
pub struct Ports {
    pub inbound: mpsc::Receiver<String>,
    pub outbound: Outbound,
}

/// The UI's side of a [`Ports`] pair.
pub struct UiEndpoints {
    pub to_bridge: mpsc::Sender<String>,
    pub from_bridge: mpsc::Receiver<String>,
}

/// Creates a connected channel pair.
pub fn ports() -> (Ports, UiEndpoints) {
    let (to_bridge, inbound) = mpsc::channel(CHANNEL_CAPACITY);
    let (outbound, from_bridge) = mpsc::channel(CHANNEL_CAPACITY);

    (
        Ports {
            inbound,
            outbound: Outbound::new(outbound),
        },
        UiEndpoints {
            to_bridge,
            from_bridge,
        },
    )
}

/// Producer half handed to the runtime while an engine loads.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    sender: mpsc::UnboundedSender<ProgressReport>,
}

impl ProgressSink {
    pub fn report(&self, report: ProgressReport) {
        // The consumer goes away once the initializer has its result.
        let _ = self.sender.send(report);
    }

    /// A sink whose reports go nowhere.
    pub fn detached() -> Self {
        let (sender, _) = mpsc::unbounded_channel();
        Self { sender }
    }
}

/// Creates a progress sink and the stream of reports it produces.
///
/// The stream ends once every clone of the sink has been dropped.
pub fn progress_channel() -> (ProgressSink, impl Stream<Item = ProgressReport> + Send + Unpin) {
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let reports = stream! {
        while let Some(report) = receiver.recv().await {
            yield report;
        }
    };

    (ProgressSink { sender }, Box::pin(reports))
}
