//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use parley_shared::constants::{
    DEFAULT_HTTP_PORT, MAX_UPLOAD_SIZE, PRESENCE_GRACE_SECS, RETENTION_DAYS,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database.
    /// Env: `DB_PATH`
    /// Default: `./parley.db`
    pub db_path: PathBuf,

    /// Directory where uploaded media files are stored.
    /// Env: `UPLOAD_PATH`
    /// Default: `./uploads`
    pub upload_path: PathBuf,

    /// How long a disconnected user stays "online" waiting for a
    /// reconnection before presence is dropped.
    /// Env: `GRACE_PERIOD_SECS`
    /// Default: `5`
    pub grace_period: Duration,

    /// Messages older than this many days are purged by the sweeper.
    /// Env: `RETENTION_DAYS`
    /// Default: `45`
    pub retention_days: i64,

    /// Maximum accepted upload size in bytes.
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            db_path: PathBuf::from("./parley.db"),
            upload_path: PathBuf::from("./uploads"),
            grace_period: Duration::from_secs(PRESENCE_GRACE_SECS),
            retention_days: RETENTION_DAYS,
            max_upload_size: MAX_UPLOAD_SIZE,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("UPLOAD_PATH") {
            config.upload_path = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("GRACE_PERIOD_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.grace_period = Duration::from_secs(secs);
            }
        }

        if let Ok(val) = std::env::var("RETENTION_DAYS") {
            if let Ok(days) = val.parse::<i64>() {
                config.retention_days = days;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
