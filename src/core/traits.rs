//! DI "Interfaces"
//!
//! The bridge only talks to the host and the model runtime through these
//! traits, so tests and alternative runtimes can be plugged in.

use crate::core::chat::ChatRequest;
use crate::core::events::ProgressSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared reference to a loaded engine.
pub type EngineHandle = Arc<dyn ChatEngine>;

#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Returns whether the host exposes a usable GPU compute interface.
    ///
    /// Must not load any model runtime.
    async fn probe(&self) -> bool;
}

#[async_trait]
pub trait RuntimeLoader: Send + Sync {
    /// Loads the model runtime module.
    async fn load(&self) -> anyhow::Result<Arc<dyn ModelRuntime>>;
}

#[async_trait]
pub trait ModelRuntime: Send + Sync {
    /// Models this runtime knows how to serve, in preference order.
    fn catalog(&self) -> Vec<ModelRecord>;

    /// Single-call factory: constructs an engine with `model_id` loaded.
    async fn create_engine(
        &self,
        model_id: &str,
        options: EngineOptions,
    ) -> anyhow::Result<EngineHandle>;

    /// Constructs an engine with no model loaded. Call
    /// [`ChatEngine::reload`] before using it.
    async fn new_engine(&self, options: EngineOptions) -> anyhow::Result<EngineHandle>;
}

#[async_trait]
pub trait ChatEngine: Send + Sync {
    /// Loads `model_id`, replacing whatever model was loaded before.
    async fn reload(&self, model_id: &str, app_config: Option<AppConfig>) -> anyhow::Result<()>;

    /// Runs a non-streaming chat completion and returns the raw reply.
    async fn chat_completion(&self, request: ChatRequest) -> anyhow::Result<serde_json::Value>;
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelRecord {
    pub model_id: Option<String>,
    /// Where the weights live.
    pub model: Option<String>,
}

impl ModelRecord {
    /// The identifier used to select this entry.
    pub fn identifier(&self) -> Option<&str> {
        [self.model_id.as_deref(), self.model.as_deref()]
            .into_iter()
            .flatten()
            .find(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub model_list: Vec<ModelRecord>,
}

impl AppConfig {
    pub fn find(&self, model_id: &str) -> Option<&ModelRecord> {
        self.model_list
            .iter()
            .find(|record| record.identifier() == Some(model_id))
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub app_config: Option<AppConfig>,
    pub progress: ProgressSink,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_prefers_model_id() {
        let record = ModelRecord {
            model_id: Some("tiny".to_string()),
            model: Some("models/tiny.gguf".to_string()),
        };
        assert_eq!(record.identifier(), Some("tiny"));
    }

    #[test]
    fn test_identifier_falls_back_to_model() {
        let record = ModelRecord {
            model_id: None,
            model: Some("models/tiny.gguf".to_string()),
        };
        assert_eq!(record.identifier(), Some("models/tiny.gguf"));
        assert_eq!(ModelRecord::default().identifier(), None);
    }

    #[test]
    fn test_app_config_find() {
        let config = AppConfig {
            model_list: vec![ModelRecord {
                model_id: Some("tiny".to_string()),
                model: None,
            }],
        };
        assert!(config.find("tiny").is_some());
        assert!(config.find("huge").is_none());
    }
}
