//! Domain model structs persisted in the local database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Transfer descriptor
// ---------------------------------------------------------------------------

/// One file inside a persisted transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorFile {
    /// Path of the file inside the transfer.
    pub path: String,
    /// Display name (last path component).
    pub name: String,
    /// Size in bytes.
    pub length: u64,
    /// MIME type guessed at seed time.
    pub mime: String,
}

/// Everything needed to re-attach the engine to a transfer after a restart.
///
/// Beyond `info_hash` and the file list the content is engine specific and
/// kept as an opaque JSON `payload`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferDescriptor {
    /// Base content identifier; the primary key.
    pub info_hash: String,
    /// Transfer name as reported by the engine.
    pub name: String,
    /// Whether the transfer is a single encrypted bundle.
    pub secure: bool,
    pub files: Vec<DescriptorFile>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

/// User preferences that survive restarts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    /// Download non-streamable transfers in order instead of rarest-first.
    pub sequential_download: bool,
    /// Display name announced to the room.
    pub peer_name: Option<String>,
}
