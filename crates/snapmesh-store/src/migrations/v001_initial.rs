//! v001 -- Initial schema creation.
//!
//! Creates the `descriptors` table (one row per engine transfer) and the
//! single-row `preferences` table.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Transfer descriptors
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS descriptors (
    info_hash  TEXT PRIMARY KEY NOT NULL,   -- base content identifier
    name       TEXT NOT NULL,
    secure     INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    files      TEXT NOT NULL,               -- JSON array of DescriptorFile
    payload    TEXT NOT NULL,               -- opaque engine JSON
    created_at TEXT NOT NULL                -- RFC-3339
);

-- ----------------------------------------------------------------
-- Preferences
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS preferences (
    id   INTEGER PRIMARY KEY CHECK (id = 1),
    json TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
