//! # Chorus Speaker Hub - standalone server
//!
//! Runs the hub with a file-backed registry store and an in-process state
//! host carrying a handful of demo entities. Speakers connect over gRPC
//! exactly as they would against an embedded hub.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use chorus_core::EntityState;
use chorus_hub::{HubConfig, HubServer, InMemoryStateHost, JsonFileStore, TracingEventBus};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("Starting Chorus Speaker Hub...");

    // Load configuration (first CLI argument may name a config file)
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = HubConfig::load_or_default(config_path.as_deref())?;
    info!(
        port = config.server.grpc_port,
        event_prefix = %config.events.prefix,
        "Configuration loaded"
    );

    // Wire the outbound ports
    let snapshot_path = config.storage.resolve_snapshot_path();
    info!(path = %snapshot_path.display(), "Registry snapshot location");
    let store = Arc::new(JsonFileStore::new(snapshot_path));
    let bus = Arc::new(TracingEventBus::new(config.events.prefix.clone()));

    let host = Arc::new(InMemoryStateHost::new());
    seed_demo_entities(&host).await;

    // Start the hub
    let server = HubServer::new(config, store, host, bus);
    let handle = server.start().await?;

    shutdown_signal().await;

    handle.shutdown().await;
    info!("Hub shutdown complete");
    Ok(())
}

/// A few entities so connected speakers have something to stream and command.
async fn seed_demo_entities(host: &Arc<InMemoryStateHost>) {
    host.set_entity(
        EntityState::new("light.kitchen", "off")
            .with_attribute("friendly_name", serde_json::json!("Kitchen Light"))
            .with_attribute("brightness", serde_json::json!(0)),
    )
    .await;
    host.set_entity(
        EntityState::new("switch.fan", "off")
            .with_attribute("friendly_name", serde_json::json!("Ceiling Fan")),
    )
    .await;
    host.set_entity(
        EntityState::new("media_player.living_room", "idle")
            .with_attribute("friendly_name", serde_json::json!("Living Room Player"))
            .with_attribute("volume_level", serde_json::json!(0.4)),
    )
    .await;
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
