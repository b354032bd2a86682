//! Persistent descriptor store seam.

use std::sync::{Mutex, MutexGuard};

use snapmesh_store::{Database, Preferences, StoreError, TransferDescriptor};

/// Durable descriptors keyed by base content identifier.
///
/// Calls are short and synchronous; callers run them inline.
pub trait DescriptorStore: Send + Sync {
    /// Returns `false` when a descriptor was already stored under the key.
    fn put(&self, descriptor: &TransferDescriptor) -> Result<bool, StoreError>;
    fn has(&self, info_hash: &str) -> Result<bool, StoreError>;
    fn list(&self) -> Result<Vec<TransferDescriptor>, StoreError>;
    fn delete(&self, info_hash: &str) -> Result<bool, StoreError>;
    fn preferences(&self) -> Result<Preferences, StoreError>;
    fn save_preferences(&self, prefs: &Preferences) -> Result<(), StoreError>;
}

pub struct SqliteStore {
    db: Mutex<Database>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        match self.db.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl DescriptorStore for SqliteStore {
    fn put(&self, descriptor: &TransferDescriptor) -> Result<bool, StoreError> {
        self.db().put_descriptor(descriptor)
    }

    fn has(&self, info_hash: &str) -> Result<bool, StoreError> {
        self.db().has_descriptor(info_hash)
    }

    fn list(&self) -> Result<Vec<TransferDescriptor>, StoreError> {
        self.db().list_descriptors()
    }

    fn delete(&self, info_hash: &str) -> Result<bool, StoreError> {
        self.db().delete_descriptor(info_hash)
    }

    fn preferences(&self) -> Result<Preferences, StoreError> {
        self.db().preferences()
    }

    fn save_preferences(&self, prefs: &Preferences) -> Result<(), StoreError> {
        self.db().save_preferences(prefs)
    }
}
