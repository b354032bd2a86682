//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a peer can start against a local
//! coordination server with no configuration at all.

use std::path::PathBuf;
use std::time::Duration;

use snapmesh_shared::constants::{
    DEFAULT_ICE_TIMEOUT_SECS, DEFAULT_PROGRESS_INTERVAL_MS, DEFAULT_RECONCILE_SECS,
    DEFAULT_SERVER_URL, DEFAULT_STUN_SERVER,
};
use snapmesh_shared::RoomId;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the coordination server.
    /// Env: `SNAPMESH_SERVER_URL`
    pub server_url: String,

    /// Room to join; a fresh room is created when unset.
    /// Env: `SNAPMESH_ROOM`
    pub room: Option<RoomId>,

    /// Display name announced to the room. Falls back to the stored
    /// preference, then to the host name.
    /// Env: `SNAPMESH_PEER_NAME`
    pub peer_name: Option<String>,

    /// SQLite database path. Defaults to the platform data directory.
    /// Env: `SNAPMESH_DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Comma separated STUN/TURN URLs used for topology discovery.
    /// Env: `SNAPMESH_STUN_SERVERS`
    pub stun_servers: Vec<String>,

    /// Interval of the periodic room refetch.
    /// Env: `SNAPMESH_RECONCILE_SECS`
    pub reconcile_interval: Duration,

    /// Minimum gap between two progress reports for one item.
    /// Env: `SNAPMESH_PROGRESS_MS`
    pub progress_interval: Duration,

    /// Upper bound on ICE gathering.
    /// Env: `SNAPMESH_ICE_TIMEOUT_SECS`
    pub ice_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            room: None,
            peer_name: None,
            db_path: None,
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_SECS),
            progress_interval: Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS),
            ice_timeout: Duration::from_secs(DEFAULT_ICE_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("SNAPMESH_SERVER_URL") {
            config.server_url = url;
        }

        if let Some(room) = lookup("SNAPMESH_ROOM").filter(|r| !r.is_empty()) {
            config.room = Some(RoomId(room));
        }

        if let Some(name) = lookup("SNAPMESH_PEER_NAME").filter(|n| !n.is_empty()) {
            config.peer_name = Some(name);
        }

        if let Some(path) = lookup("SNAPMESH_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(servers) = lookup("SNAPMESH_STUN_SERVERS") {
            config.stun_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(secs) = parse_u64(&lookup, "SNAPMESH_RECONCILE_SECS") {
            config.reconcile_interval = Duration::from_secs(secs.max(1));
        }

        if let Some(ms) = parse_u64(&lookup, "SNAPMESH_PROGRESS_MS") {
            config.progress_interval = Duration::from_millis(ms);
        }

        if let Some(secs) = parse_u64(&lookup, "SNAPMESH_ICE_TIMEOUT_SECS") {
            config.ice_timeout = Duration::from_secs(secs);
        }

        config
    }
}

fn parse_u64<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "invalid number, using default");
            None
        }
    }
}
