//! GPU capability probe

use crate::core::traits::CapabilityProbe;
use async_trait::async_trait;
use log::{info, warn};
use wgcore::gpu::GpuInstance;

pub struct GpuProbe {
    disabled: bool,
}

impl GpuProbe {
    pub fn new(disabled: bool) -> Self {
        Self { disabled }
    }
}

#[async_trait]
impl CapabilityProbe for GpuProbe {
    async fn probe(&self) -> bool {
        if self.disabled {
            info!("GPU disabled by configuration");
            return false;
        }

        match GpuInstance::new().await {
            Ok(gpu) => {
                info!("GPU device features: {:?}", gpu.device().features());
                true
            }
            Err(e) => {
                warn!("No usable GPU: {e:?}");
                false
            }
        }
    }
}
