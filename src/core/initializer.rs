//! Engine initialization.
//!
//! Runs once at startup: probes for a GPU, loads the model runtime, picks a
//! model and constructs an engine, streaming load progress to the UI. Every
//! failure ends up as an event or a log line and the caller gets `None`.

use crate::core::error::BridgeError;
use crate::core::events::{Outbound, OutboundEvent, ProgressReport, progress_channel};
use crate::core::traits::{
    AppConfig, CapabilityProbe, EngineHandle, EngineOptions, ModelRecord, ModelRuntime,
    RuntimeLoader,
};
use anyhow::anyhow;
use futures_util::{FutureExt, Stream, StreamExt};
use log::{error, info, warn};
use std::future::Future;
use std::sync::Arc;

pub const CAPABILITY_REMEDIATION: &str = "Error: Unable to find a compatible GPU. This host does not appear to expose a GPU compute interface.\n\
Suggestions: 1) Make sure a Vulkan, Metal or DirectX 12 capable GPU and an up to date driver are installed.\n\
2) Unset DISABLE_GPU if it was set to skip GPU detection.\n\
3) See https://wgpu.rs/ for supported backends and troubleshooting.\n\
Falling back to simulated responses so the UI remains testable.";

/// Builds the message sent when engine construction failed for a GPU-related
/// reason.
pub fn init_failure_message(details: &str) -> String {
    format!(
        "Error: Unable to initialize GPU/engine. Details: {details}\n\
Possible causes: no compatible GPU, missing GPU backend support, or driver issues.\n\
Recommendations: 1) Check that the GPU driver exposes Vulkan, Metal or DirectX 12.\n\
2) Try a smaller model or a smaller CONTEXT_SIZE.\n\
3) If you cannot use a GPU, continue with simulated responses for UI testing."
    )
}

/// Whether an error text points at GPU or driver trouble.
pub fn is_gpu_failure(text: &str) -> bool {
    let text = text.to_lowercase();
    ["gpu", "webgpu", "unable to find a compatible"]
        .iter()
        .any(|pattern| text.contains(pattern))
}

/// The model to construct, plus the catalog entry that describes it when it
/// was picked from the runtime's catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSelection {
    pub model_id: String,
    pub app_config: Option<AppConfig>,
}

pub fn select_model(configured: Option<&str>, catalog: &[ModelRecord]) -> Option<ModelSelection> {
    if let Some(model_id) = configured.filter(|id| !id.is_empty()) {
        return Some(ModelSelection {
            model_id: model_id.to_owned(),
            app_config: None,
        });
    }

    let first = catalog.first()?;
    let model_id = first.identifier()?.to_owned();
    info!("Using model from runtime catalog: {model_id}");

    Some(ModelSelection {
        model_id,
        app_config: Some(AppConfig {
            model_list: vec![first.clone()],
        }),
    })
}

/// Ways of getting a loaded engine out of a runtime, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructionStrategy {
    /// `create_engine(model_id, options)`.
    CreateEngine,
    /// `new_engine(options)` followed by `reload(model_id)`.
    NewEngineThenReload,
}

pub const CONSTRUCTION_STRATEGIES: [ConstructionStrategy; 2] = [
    ConstructionStrategy::CreateEngine,
    ConstructionStrategy::NewEngineThenReload,
];

impl ConstructionStrategy {
    async fn attempt(
        self,
        runtime: &dyn ModelRuntime,
        model_id: &str,
        options: EngineOptions,
    ) -> anyhow::Result<EngineHandle> {
        match self {
            ConstructionStrategy::CreateEngine => runtime.create_engine(model_id, options).await,
            ConstructionStrategy::NewEngineThenReload => {
                let app_config = options.app_config.clone();
                let engine = runtime.new_engine(options).await?;
                engine.reload(model_id, app_config).await?;
                Ok(engine)
            }
        }
    }
}

/// Tries each strategy in turn. The first success wins; if all fail, the last
/// failure is returned.
pub async fn construct(
    runtime: &dyn ModelRuntime,
    model_id: &str,
    options: EngineOptions,
) -> anyhow::Result<EngineHandle> {
    let mut last_failure = None;

    for strategy in CONSTRUCTION_STRATEGIES {
        match strategy.attempt(runtime, model_id, options.clone()).await {
            Ok(engine) => return Ok(engine),
            Err(e) => {
                warn!("{strategy:?} failed for {model_id}: {e:#}");
                last_failure = Some(e);
            }
        }
    }

    Err(last_failure.unwrap_or_else(|| anyhow!("no construction strategy available")))
}

pub struct EngineInitializer {
    probe: Arc<dyn CapabilityProbe>,
    loader: Arc<dyn RuntimeLoader>,
    model_id: Option<String>,
}

impl EngineInitializer {
    pub fn new(
        probe: Arc<dyn CapabilityProbe>,
        loader: Arc<dyn RuntimeLoader>,
        model_id: Option<String>,
    ) -> Self {
        Self {
            probe,
            loader,
            model_id,
        }
    }

    /// Sets up the engine, reporting the outcome on `outbound`.
    ///
    /// Never fails: on any error the UI is told (where appropriate) and `None`
    /// is returned so the relay can run in simulated mode.
    pub async fn initialize(&self, outbound: &Outbound) -> Option<EngineHandle> {
        match self.try_initialize(outbound).await {
            Ok((engine, model)) => {
                info!("Engine ready: {model}");
                outbound.emit(&OutboundEvent::Ready { model }).await;
                Some(engine)
            }
            Err(BridgeError::CapabilityUnavailable) => {
                warn!("{CAPABILITY_REMEDIATION}");
                outbound
                    .emit(&OutboundEvent::error(CAPABILITY_REMEDIATION))
                    .await;
                None
            }
            Err(BridgeError::NoModelSelected) => {
                // TODO: surface this to the UI once it has a way to render a
                // non-fatal notice; today it only reaches the log.
                warn!("No model id and no catalog entry; using simulated replies");
                None
            }
            Err(e) => {
                let text = e.to_string();
                if is_gpu_failure(&text) {
                    let message = init_failure_message(&text);
                    error!("{message}");
                    outbound.emit(&OutboundEvent::error(message)).await;
                } else {
                    error!("Failed to load or initialize the model runtime: {text}");
                    outbound.emit(&OutboundEvent::error(text)).await;
                }
                None
            }
        }
    }

    async fn try_initialize(
        &self,
        outbound: &Outbound,
    ) -> Result<(EngineHandle, String), BridgeError> {
        if !self.probe.probe().await {
            return Err(BridgeError::CapabilityUnavailable);
        }

        let runtime = self.loader.load().await.map_err(BridgeError::EngineInit)?;
        info!("Model runtime loaded");

        let selection = select_model(self.model_id.as_deref(), &runtime.catalog())
            .ok_or(BridgeError::NoModelSelected)?;

        let (progress, reports) = progress_channel();
        let options = EngineOptions {
            app_config: selection.app_config,
            progress,
        };

        let engine = forward_progress(
            construct(runtime.as_ref(), &selection.model_id, options),
            reports,
            outbound,
        )
        .await
        .map_err(BridgeError::EngineInit)?;

        Ok((engine, selection.model_id))
    }
}

/// Drives `construction` to completion while forwarding progress reports.
///
/// Reports queued by the time construction finishes are still forwarded, so
/// they always precede the terminal event.
async fn forward_progress<F, S>(
    construction: F,
    mut reports: S,
    outbound: &Outbound,
) -> anyhow::Result<EngineHandle>
where
    F: Future<Output = anyhow::Result<EngineHandle>>,
    S: Stream<Item = ProgressReport> + Unpin,
{
    tokio::pin!(construction);
    let mut reports_open = true;

    let result = loop {
        tokio::select! {
            biased;
            report = reports.next(), if reports_open => match report {
                Some(data) => outbound.emit(&OutboundEvent::Progress { data }).await,
                None => reports_open = false,
            },
            result = &mut construction => break result,
        }
    };

    while let Some(Some(data)) = reports.next().now_or_never() {
        outbound.emit(&OutboundEvent::Progress { data }).await;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(model_id: Option<&str>, model: Option<&str>) -> ModelRecord {
        ModelRecord {
            model_id: model_id.map(str::to_owned),
            model: model.map(str::to_owned),
        }
    }

    #[test]
    fn test_configured_model_wins_over_catalog() {
        let catalog = vec![record(Some("from-catalog"), None)];

        let selection = select_model(Some("configured"), &catalog).unwrap();
        assert_eq!(selection.model_id, "configured");
        assert_eq!(selection.app_config, None);
    }

    #[test]
    fn test_empty_configured_model_selects_first_catalog_entry() {
        let catalog = vec![
            record(Some("first"), Some("models/first.gguf")),
            record(Some("second"), None),
        ];

        let selection = select_model(Some(""), &catalog).unwrap();
        assert_eq!(selection.model_id, "first");
        assert_eq!(
            selection.app_config,
            Some(AppConfig {
                model_list: vec![catalog[0].clone()]
            })
        );
    }

    #[test]
    fn test_no_model_and_empty_catalog_selects_nothing() {
        assert_eq!(select_model(None, &[]), None);
        assert_eq!(select_model(None, &[record(None, None)]), None);
    }

    #[test]
    fn test_gpu_failure_patterns() {
        assert!(is_gpu_failure("WebGPU is not supported"));
        assert!(is_gpu_failure("failed to create GPU"));
        assert!(is_gpu_failure("Unable to find a compatible adapter"));
        assert!(!is_gpu_failure("model file not found"));
    }

    #[test]
    fn test_init_failure_message_embeds_details() {
        let message = init_failure_message("no adapter");
        assert!(message.starts_with("Error: Unable to initialize GPU/engine. Details: no adapter\n"));
    }
}
