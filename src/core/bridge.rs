//! Wires the engine initializer and the relay loop to an injected UI
//! channel pair.
//!

use crate::core::events::Ports;
use crate::core::initializer::EngineInitializer;
use crate::core::relay::Relay;
use log::warn;
use std::time::Duration;

pub struct Bridge {
    initializer: EngineInitializer,
    ports: Ports,
    simulated_delay: Duration,
}

impl Bridge {
    pub fn new(initializer: EngineInitializer, ports: Ports, simulated_delay: Duration) -> Self {
        Self {
            initializer,
            ports,
            simulated_delay,
        }
    }

    /// Initializes the engine once, then relays messages until the UI's
    /// inbound channel closes.
    pub async fn run(self) {
        let Ports { inbound, outbound } = self.ports;

        let engine = self.initializer.initialize(&outbound).await;

        if outbound.is_closed() {
            warn!("UI channel not available; not relaying messages");
            return;
        }

        Relay::new(engine, outbound, self.simulated_delay)
            .run(inbound)
            .await;
    }
}
