//! Relays chat messages between a browser UI and a local LLM running on WGPU
//!
//! (c) Softlandia 2025

use local_chat_bridge::api;
use local_chat_bridge::build_bridge;
use local_chat_bridge::core::events::ports;
use local_chat_bridge::infrastructure::config::Config;

use log::info;
use tokio::runtime::{Builder, Runtime};
use tokio::signal;

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    info!("Configuration: {config:?}");

    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;

    let (ports, ui) = ports();

    // engine initialization and the relay loop
    let bridge_join_handle = runtime.spawn(build_bridge(&config, ports).run());

    runtime.block_on(async {
        web_server_task(
            &config.listen_addr,
            api::AppState::new(ui.to_bridge, ui.from_bridge),
        )
        .await?;

        bridge_join_handle.abort();
        anyhow::Ok(())
    })
}

async fn web_server_task(listen_addr: &str, state: api::AppState) -> anyhow::Result<()> {
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Shutting down...");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        log::error!("failed to install Ctrl+C handler: {e}");
        std::future::pending::<()>().await;
    }
}
