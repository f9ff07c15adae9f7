/// Seconds to wait after a transport disconnect before a user is considered
/// offline. Brief drops (tab refresh, network blip) reconnect within this
/// window without flapping presence or losing queued messages.
pub const PRESENCE_GRACE_SECS: u64 = 5;

/// Messages and their media are permanently removed after this many days.
/// Nothing in the core may assume an older message remains retrievable.
pub const RETENTION_DAYS: i64 = 45;

/// How often the retention sweeper runs.
pub const RETENTION_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Default page size for message history queries.
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// Maximum accepted upload size in bytes (50 MiB).
pub const MAX_UPLOAD_SIZE: usize = 50 * 1024 * 1024;

/// Default HTTP/WebSocket listen port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;
