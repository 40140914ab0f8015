//! Relays chat messages between a browser UI and a local LLM running on WGPU
//! - Library exports for testing
//!
//! (c) Softlandia 2025

pub mod api;
pub mod core;
pub mod infrastructure;

use crate::core::bridge::Bridge;
use crate::core::events::Ports;
use crate::core::initializer::EngineInitializer;
use crate::infrastructure::config::Config;
use crate::infrastructure::gpu::GpuProbe;
use crate::infrastructure::wgml_engine::{WgmlLoader, WgmlSettings};
use std::sync::Arc;

/// Builds the bridge for `config`, backed by the GPU probe and the wgml
/// runtime.
pub fn build_bridge(config: &Config, ports: Ports) -> Bridge {
    let initializer = EngineInitializer::new(
        Arc::new(GpuProbe::new(config.gpu_disabled)),
        Arc::new(WgmlLoader::new(WgmlSettings {
            models_dir: config.models_dir.clone(),
            context_size: config.context_size,
            max_completion_tokens: config.max_completion_tokens,
        })),
        config.model_id.clone(),
    );

    Bridge::new(initializer, ports, config.simulated_reply_delay)
}
