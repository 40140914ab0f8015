//! Bridge error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// No GPU compute interface on this host.
    #[error("Unable to find a compatible GPU")]
    CapabilityUnavailable,

    /// Runtime load or every construction strategy failed.
    #[error("{0:#}")]
    EngineInit(anyhow::Error),

    #[error("no model id configured and the runtime catalog is empty")]
    NoModelSelected,

    /// A single chat completion failed.
    #[error("{0:#}")]
    Completion(anyhow::Error),

    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}
