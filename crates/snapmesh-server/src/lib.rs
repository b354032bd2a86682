//! # snapmesh-server
//!
//! Coordination server for snapmesh rooms. It keeps each room's peers,
//! shared items, ownership and reported connections in memory and fans
//! every change out to subscribers over server-sent events. Content itself
//! never passes through the server.

pub mod api;
pub mod config;
pub mod error;
pub mod rooms;

pub use api::{build_router, serve, AppState};
pub use config::ServerConfig;
pub use error::ServerError;
pub use rooms::RoomRegistry;
