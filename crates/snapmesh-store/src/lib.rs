//! # snapmesh-store
//!
//! Local durable storage for the snapmesh client, backed by SQLite.
//!
//! The store holds the transfer descriptors of items this peer has seeded or
//! downloaded, keyed by base content identifier, so that a restarted client
//! can re-attach its engine to them. It also keeps the user preferences.
//! The crate exposes a synchronous `Database` handle wrapping a
//! `rusqlite::Connection`.

pub mod database;
pub mod descriptors;
pub mod migrations;
pub mod models;
pub mod settings;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
