//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;

use snapmesh_shared::constants::DEFAULT_HTTP_PORT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Maximum number of live rooms (0 = unlimited).
    /// Env: `MAX_ROOMS`
    /// Default: `0`
    pub max_rooms: usize,

    /// Whether `DELETE /api/rooms/` may wipe every room.
    /// Env: `ALLOW_WIPE` (true/false)
    /// Default: `false`
    pub allow_wipe: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            max_rooms: 0,
            allow_wipe: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Ok(val) = std::env::var("MAX_ROOMS") {
            match val.parse::<usize>() {
                Ok(n) => config.max_rooms = n,
                Err(_) => tracing::warn!(value = %val, "Invalid MAX_ROOMS, using default"),
            }
        }

        if let Ok(val) = std::env::var("ALLOW_WIPE") {
            config.allow_wipe = parse_flag(&val);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn parse_flag(val: &str) -> bool {
    let val = val.trim();
    val != "false" && val != "0" && !val.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.max_rooms, 0);
        assert!(!config.allow_wipe);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }
}
