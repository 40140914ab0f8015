//! End-to-end bridge runs over in-process channels.

mod common;

use common::{MockLoader, MockRuntime, StaticProbe, next_event};
use local_chat_bridge::core::bridge::Bridge;
use local_chat_bridge::core::events::{OutboundEvent, Ports, ports};
use local_chat_bridge::core::initializer::{CAPABILITY_REMEDIATION, EngineInitializer};
use local_chat_bridge::core::relay::DEFAULT_SIMULATED_DELAY;
use std::sync::Arc;
use std::time::Duration;

fn bridge(probe: bool, runtime: MockRuntime, ports: Ports) -> Bridge {
    let initializer = EngineInitializer::new(
        Arc::new(StaticProbe(probe)),
        MockLoader::new(runtime),
        Some("tiny".to_string()),
    );
    Bridge::new(initializer, ports, DEFAULT_SIMULATED_DELAY)
}

#[tokio::test]
async fn test_ready_precedes_replies() {
    let (ports, mut ui) = ports();
    // Queued before initialization finishes.
    ui.to_bridge.send("hello".to_string()).await.unwrap();

    let handle = tokio::spawn(bridge(true, MockRuntime::with_progress(&["Loading"]), ports).run());

    assert!(matches!(next_event(&mut ui).await, OutboundEvent::Progress { .. }));
    assert_eq!(
        next_event(&mut ui).await,
        OutboundEvent::Ready {
            model: "tiny".to_string()
        }
    );
    assert!(matches!(
        next_event(&mut ui).await,
        OutboundEvent::Reply { text, raw: Some(_) } if text == "hello"
    ));

    drop(ui.to_bridge);
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("bridge should stop when the UI closes its channel")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_degraded_mode_reports_then_simulates() {
    let (ports, mut ui) = ports();
    tokio::spawn(bridge(false, MockRuntime::default(), ports).run());

    ui.to_bridge.send("ping".to_string()).await.unwrap();

    assert_eq!(
        next_event(&mut ui).await,
        OutboundEvent::error(CAPABILITY_REMEDIATION)
    );
    assert_eq!(
        next_event(&mut ui).await,
        OutboundEvent::Reply {
            text: "(simulated) Echo: ping".to_string(),
            raw: None
        }
    );
}

#[tokio::test]
async fn test_missing_ui_channel_stops_after_init() {
    let (ports, ui) = ports();
    let to_bridge = ui.to_bridge;
    drop(ui.from_bridge);

    tokio::time::timeout(
        Duration::from_secs(5),
        bridge(true, MockRuntime::default(), ports).run(),
    )
    .await
    .expect("bridge should not relay without a UI channel");

    assert!(to_bridge.is_closed());
}
