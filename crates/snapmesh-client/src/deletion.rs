//! Removing items.
//!
//! The server is told first but local removal never depends on it: an
//! unreachable server must not leave content stuck in the engine.

use std::sync::Arc;

use tracing::{debug, info, warn};

use snapmesh_shared::content_id;

use crate::events::ContentEvent;
use crate::session::Session;

pub struct DeletionManager {
    session: Arc<Session>,
}

impl DeletionManager {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Delete the item everywhere. Returns the identifier for the caller's
    /// bookkeeping.
    pub async fn delete_item(&self, info_hash: &str) -> String {
        let api = &self.session.room_api;
        match api.delete_photo(&self.session.room_id, info_hash).await {
            Ok(()) => debug!(info_hash, "server deleted item"),
            Err(e) => warn!(info_hash, error = %e, "server delete failed, removing locally"),
        }
        self.remove_local(info_hash).await;
        info_hash.to_string()
    }

    /// Drop the item from local state. The engine transfer and its
    /// descriptor go too once no other item references the transfer.
    pub async fn remove_local(&self, info_hash: &str) {
        let session = &self.session;
        let base = content_id::base_hash(info_hash).to_string();
        session.photos.remove(info_hash);

        let siblings = session.photos.for_base(&base).len();
        if siblings > 0 {
            debug!(info_hash, siblings, "transfer still referenced");
            session.bus.emit(ContentEvent::Deleted {
                info_hash: info_hash.to_string(),
            });
            return;
        }

        if let Err(e) = session.store.delete(&base) {
            warn!(info_hash = %base, error = %e, "failed to delete descriptor");
        }
        if session.engine.holds(&base) {
            if let Err(e) = session.engine.remove(&base).await {
                warn!(info_hash = %base, error = %e, "failed to remove transfer");
            }
        }
        session.peers.disconnect(&base);

        info!(info_hash, "item removed");
        session.bus.emit(ContentEvent::Deleted {
            info_hash: info_hash.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use snapmesh_net::RoomCall;
    use snapmesh_store::{Preferences, StoreError, TransferDescriptor};

    use crate::engine::{MemoryEngine, SourceFile};
    use crate::store::{DescriptorStore, SqliteStore};
    use crate::testing::Harness;

    /// Store whose deletes always fail.
    struct StuckStore(SqliteStore);

    impl DescriptorStore for StuckStore {
        fn put(&self, descriptor: &TransferDescriptor) -> Result<bool, StoreError> {
            self.0.put(descriptor)
        }
        fn has(&self, info_hash: &str) -> Result<bool, StoreError> {
            self.0.has(info_hash)
        }
        fn list(&self) -> Result<Vec<TransferDescriptor>, StoreError> {
            self.0.list()
        }
        fn delete(&self, _info_hash: &str) -> Result<bool, StoreError> {
            Err(StoreError::Migration("disk is read-only".into()))
        }
        fn preferences(&self) -> Result<Preferences, StoreError> {
            self.0.preferences()
        }
        fn save_preferences(&self, prefs: &Preferences) -> Result<(), StoreError> {
            self.0.save_preferences(prefs)
        }
    }

    async fn seeded(harness: &Harness) -> String {
        let seeded = harness
            .additions
            .seed(
                vec![SourceFile::new("a.jpg", "image/jpeg", Bytes::from_static(b"abc"))],
                false,
                Vec::new(),
            )
            .await
            .unwrap();
        seeded.info_hashes[0].clone()
    }

    #[tokio::test]
    async fn delete_survives_unreachable_server() {
        let harness = Harness::new();
        let id = seeded(&harness).await;
        harness.room.fail_deletes(true);

        harness.coordinator.delete(&id).await;

        assert!(harness.room.calls().contains(&RoomCall::DeletePhoto(id.clone())));
        assert!(!harness.session.engine.holds(&id));
        assert!(harness.session.photos.get(&id).is_none());
        assert!(!harness.session.store.has(&id).unwrap());
    }

    #[tokio::test]
    async fn delete_survives_store_failure() {
        let memory = Arc::new(MemoryEngine::new());
        let store = Arc::new(StuckStore(SqliteStore::in_memory().unwrap()));
        let harness = Harness::build(Harness::default_room(), memory.clone(), memory, store);
        let id = seeded(&harness).await;

        harness.coordinator.delete(&id).await;

        assert!(!harness.session.engine.holds(&id));
        assert!(harness.session.photos.get(&id).is_none());
    }

    #[tokio::test]
    async fn siblings_keep_the_transfer() {
        let harness = Harness::new();
        let seeded = harness
            .additions
            .seed(
                vec![
                    SourceFile::new("a.jpg", "image/jpeg", Bytes::from_static(b"a")),
                    SourceFile::new("b.jpg", "image/jpeg", Bytes::from_static(b"b")),
                ],
                false,
                Vec::new(),
            )
            .await
            .unwrap();
        assert_eq!(seeded.info_hashes.len(), 2);

        harness.coordinator.delete(&seeded.info_hashes[0]).await;
        assert!(harness.session.engine.holds(&seeded.info_hashes[1]));

        harness.coordinator.delete(&seeded.info_hashes[1]).await;
        assert!(!harness.session.engine.holds(&seeded.info_hashes[1]));
    }
}
