use thiserror::Error;

/// Failures reading or writing transfer descriptors and preferences.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No platform data directory to put `snapmesh.db` in.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Creating the database directory failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No descriptor is stored under the requested identifier.
    #[error("Record not found")]
    NotFound,

    #[error("Migration error: {0}")]
    Migration(String),

    /// A descriptor's file list, payload or the preferences row is not valid JSON.
    #[error("Corrupt stored JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A descriptor's `created_at` is not RFC 3339.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
