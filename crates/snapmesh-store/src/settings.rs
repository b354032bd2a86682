use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::Preferences;

impl Database {
    /// Stored preferences, or the defaults when none were saved yet.
    pub fn preferences(&self) -> Result<Preferences> {
        let json: Option<String> = self
            .conn()
            .query_row("SELECT json FROM preferences WHERE id = 1", [], |row| row.get(0))
            .optional()?;

        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Preferences::default()),
        }
    }

    pub fn save_preferences(&self, prefs: &Preferences) -> Result<()> {
        let json = serde_json::to_string(prefs)?;
        self.conn().execute(
            "INSERT INTO preferences (id, json) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET json = excluded.json",
            params![json],
        )?;
        tracing::info!(sequential = prefs.sequential_download, "preferences saved");
        Ok(())
    }
}
