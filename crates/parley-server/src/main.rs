//! # parley-server
//!
//! The authoritative Parley chat process.
//!
//! This binary provides:
//! - **WebSocket gateway** for real-time messaging: presence tracking,
//!   room broadcasts, delivery/seen acknowledgement, and reconnection-safe
//!   replay of messages queued while a user was offline
//! - **REST API** (axum) mirroring the wire events for connectionless
//!   clients and attachment-bearing sends
//! - **SQLite persistence** for users, groups, and messages
//! - **Media upload storage** with a retention sweeper that purges
//!   messages and files older than the retention window
//!
//! Presence and delivery state are process-local: this design assumes a
//! single authoritative process and trades horizontal scalability for
//! simplicity.

mod api;
mod config;
mod delivery;
mod dispatch;
mod error;
mod media;
mod presence;
mod retention;
mod rooms;
mod session;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::delivery::DeliveryTracker;
use crate::dispatch::{Dispatcher, SharedStore};
use crate::media::MediaStore;
use crate::presence::PresenceRegistry;
use crate::rooms::Hub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    let store: SharedStore = Arc::new(Mutex::new(Database::open_at(&config.db_path)?));

    let media = Arc::new(
        MediaStore::new(config.upload_path.clone(), config.max_upload_size).await?,
    );

    let hub = Hub::new();
    let presence = PresenceRegistry::new();
    let dispatcher = Dispatcher::new(
        store.clone(),
        hub.clone(),
        presence.clone(),
        DeliveryTracker::new(),
    );

    let state = AppState {
        dispatcher,
        hub,
        presence,
        store: store.clone(),
        media: media.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Daily retention sweep: purge messages (and their media) older than
    // the retention window.
    let _sweeper = retention::spawn_retention_sweeper(store, media, config.retention_days);

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
