use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{DescriptorFile, TransferDescriptor};

impl Database {
    /// Persist a descriptor unless one is already stored under its key.
    ///
    /// Returns `true` when a row was written.
    pub fn put_descriptor(&self, descriptor: &TransferDescriptor) -> Result<bool> {
        let files = serde_json::to_string(&descriptor.files)?;
        let payload = serde_json::to_string(&descriptor.payload)?;

        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO descriptors (info_hash, name, secure, files, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                descriptor.info_hash,
                descriptor.name,
                descriptor.secure as i32,
                files,
                payload,
                descriptor.created_at.to_rfc3339(),
            ],
        )?;

        if affected > 0 {
            tracing::debug!(info_hash = %descriptor.info_hash, "stored transfer descriptor");
        }
        Ok(affected > 0)
    }

    pub fn get_descriptor(&self, info_hash: &str) -> Result<TransferDescriptor> {
        let raw = self
            .conn()
            .query_row(
                "SELECT info_hash, name, secure, files, payload, created_at
                 FROM descriptors
                 WHERE info_hash = ?1",
                params![info_hash],
                row_to_raw,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        raw.decode()
    }

    pub fn has_descriptor(&self, info_hash: &str) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM descriptors WHERE info_hash = ?1",
            params![info_hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All stored descriptors, oldest first.
    ///
    /// A row whose JSON columns no longer decode is skipped with a warning so
    /// one corrupt entry does not hide the others.
    pub fn list_descriptors(&self) -> Result<Vec<TransferDescriptor>> {
        let mut stmt = self.conn().prepare(
            "SELECT info_hash, name, secure, files, payload, created_at
             FROM descriptors
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map([], row_to_raw)?;

        let mut descriptors = Vec::new();
        for row in rows {
            let raw = row?;
            let key = raw.info_hash.clone();
            match raw.decode() {
                Ok(d) => descriptors.push(d),
                Err(e) => tracing::warn!(info_hash = %key, error = %e, "skipping corrupt descriptor"),
            }
        }
        Ok(descriptors)
    }

    pub fn delete_descriptor(&self, info_hash: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM descriptors WHERE info_hash = ?1", params![info_hash])?;
        Ok(affected > 0)
    }
}

struct RawDescriptor {
    info_hash: String,
    name: String,
    secure: bool,
    files: String,
    payload: String,
    created_at: String,
}

impl RawDescriptor {
    fn decode(self) -> Result<TransferDescriptor> {
        let files: Vec<DescriptorFile> = serde_json::from_str(&self.files)?;
        let payload: serde_json::Value = serde_json::from_str(&self.payload)?;
        let created_at: DateTime<Utc> =
            DateTime::parse_from_rfc3339(&self.created_at)?.with_timezone(&Utc);

        Ok(TransferDescriptor {
            info_hash: self.info_hash,
            name: self.name,
            secure: self.secure,
            files,
            payload,
            created_at,
        })
    }
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawDescriptor> {
    let secure_int: i32 = row.get(2)?;
    Ok(RawDescriptor {
        info_hash: row.get(0)?,
        name: row.get(1)?,
        secure: secure_int != 0,
        files: row.get(3)?,
        payload: row.get(4)?,
        created_at: row.get(5)?,
    })
}
