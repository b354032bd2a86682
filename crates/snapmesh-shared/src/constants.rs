/// Application name
pub const APP_NAME: &str = "snapmesh";

/// REST base path of the coordination server
pub const API_BASE: &str = "/api/rooms";

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Coordination server used when nothing is configured
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";

/// Prefix of the synthetic identifier given to an upload before the engine
/// has minted its real content identifier.
pub const PLACEHOLDER_PREFIX: &str = "loading-";

/// File-name prefix of the preview thumbnail bundled next to an original.
pub const THUMBNAIL_PREFIX: &str = "thumbnail-";

/// NAT classification labels attached to reflexive network chain entries
pub const NORMAL_NAT: &str = "Normal NAT";
pub const SYMMETRIC_NAT: &str = "Symmetric NAT";

/// STUN server queried by topology discovery when none is configured
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Minimum interval between two progress reports for the same item
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 1_000;

/// Interval of the periodic room refetch + reconciliation
pub const DEFAULT_RECONCILE_SECS: u64 = 30;

/// Upper bound on ICE gathering during topology discovery
pub const DEFAULT_ICE_TIMEOUT_SECS: u64 = 10;

/// File extensions the engine can stream while still downloading. Transfers
/// that contain none of these get an explicit download strategy.
pub const STREAMABLE_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "webm", "mkv", "mov", "mp3", "m4a", "aac", "ogg", "oga", "opus", "wav", "flac",
];
