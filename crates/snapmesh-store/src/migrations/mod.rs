//! Schema migrations for the peer's local database.
//!
//! The schema holds two tables: `descriptors`, one row per persisted
//! transfer keyed by its base content identifier, and `preferences`, a
//! single JSON row. The applied version lives in SQLite's `user_version`
//! pragma; [`crate::Database`] runs this on every open.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Schema version written by the newest migration.
const CURRENT_VERSION: u32 = 1;

/// Bring an open connection up to [`CURRENT_VERSION`].
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    tracing::debug!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking database migrations"
    );

    if current < 1 {
        tracing::info!("applying migration v001_initial");
        v001_initial::up(conn).map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(())
}
