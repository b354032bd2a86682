//! The in-memory item list.
//!
//! The list is an immutable snapshot published through a `watch` channel.
//! Every update builds a new `Vec` and swaps it in atomically, so a reader
//! holding a snapshot never observes a partial change.

use std::sync::Arc;

use tokio::sync::watch;

use snapmesh_shared::content_id;
use snapmesh_shared::protocol::OwnerChange;
use snapmesh_shared::{PeerId, PhotoRecord};

pub type PhotoSnapshot = Arc<Vec<PhotoRecord>>;

#[derive(Clone)]
pub struct PhotoCollection {
    tx: Arc<watch::Sender<PhotoSnapshot>>,
}

impl Default for PhotoCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl PhotoCollection {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(Vec::new()));
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> PhotoSnapshot {
        Arc::clone(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<PhotoSnapshot> {
        self.tx.subscribe()
    }

    pub fn get(&self, info_hash: &str) -> Option<PhotoRecord> {
        self.snapshot()
            .iter()
            .find(|p| p.info_hash == info_hash)
            .cloned()
    }

    /// Records that belong to transfer `base`.
    pub fn for_base(&self, base: &str) -> Vec<PhotoRecord> {
        self.snapshot()
            .iter()
            .filter(|p| content_id::base_hash(&p.info_hash) == base)
            .cloned()
            .collect()
    }

    /// Replace the list with the result of `f` applied to the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&[PhotoRecord]) -> Vec<PhotoRecord>,
    {
        self.tx.send_modify(|current| {
            let next = f(current.as_slice());
            *current = Arc::new(next);
        });
    }

    pub fn replace(&self, photos: Vec<PhotoRecord>) {
        self.tx.send_replace(Arc::new(photos));
    }

    /// Insert `record`, replacing any record with the same identifier.
    pub fn upsert(&self, record: PhotoRecord) {
        self.update(|current| {
            let mut next = current.to_vec();
            match next.iter_mut().find(|p| p.info_hash == record.info_hash) {
                Some(existing) => *existing = record,
                None => next.push(record),
            }
            next
        });
    }

    /// Apply `f` to the record `info_hash`, returning the updated copy.
    pub fn modify<F>(&self, info_hash: &str, f: F) -> Option<PhotoRecord>
    where
        F: FnOnce(&mut PhotoRecord),
    {
        let mut updated = None;
        self.update(|current| {
            let mut next = current.to_vec();
            if let Some(record) = next.iter_mut().find(|p| p.info_hash == info_hash) {
                f(record);
                updated = Some(record.clone());
            }
            next
        });
        updated
    }

    /// Fallible variant of [`PhotoCollection::modify`]. The list is left
    /// untouched when `f` fails.
    pub fn try_modify<F, E>(&self, info_hash: &str, f: F) -> Option<Result<PhotoRecord, E>>
    where
        F: FnOnce(&mut PhotoRecord) -> Result<(), E>,
    {
        let mut outcome = None;
        self.update(|current| {
            let mut next = current.to_vec();
            if let Some(record) = next.iter_mut().find(|p| p.info_hash == info_hash) {
                let mut candidate = record.clone();
                match f(&mut candidate) {
                    Ok(()) => {
                        *record = candidate.clone();
                        outcome = Some(Ok(candidate));
                    }
                    Err(e) => outcome = Some(Err(e)),
                }
            }
            next
        });
        outcome
    }

    pub fn remove(&self, info_hash: &str) -> Option<PhotoRecord> {
        let mut removed = None;
        self.update(|current| {
            current
                .iter()
                .filter(|p| {
                    if p.info_hash == info_hash {
                        removed = Some((*p).clone());
                        false
                    } else {
                        true
                    }
                })
                .cloned()
                .collect()
        });
        removed
    }

    /// Merge the server list in.
    ///
    /// Server records win for server-owned fields while local lifecycle
    /// state is kept. Local-only records survive only when `keep_local`
    /// says so (uploads the server does not know about yet).
    pub fn sync_with<F>(&self, server: &[PhotoRecord], keep_local: F)
    where
        F: Fn(&PhotoRecord) -> bool,
    {
        self.update(|current| {
            let mut next: Vec<PhotoRecord> = server
                .iter()
                .map(|remote| match current.iter().find(|p| p.info_hash == remote.info_hash) {
                    Some(local) => local.merged_with(remote),
                    None => remote.clone(),
                })
                .collect();

            next.extend(
                current
                    .iter()
                    .filter(|p| !server.iter().any(|r| r.info_hash == p.info_hash))
                    .filter(|p| keep_local(p))
                    .cloned(),
            );
            next
        });
    }

    /// Apply an ownership push event to the matching record.
    pub fn apply_owner(&self, change: &OwnerChange, removed: bool) {
        self.modify(&change.info_hash, |record| {
            *record = if removed {
                record.without_owner(&change.peer_id)
            } else {
                record.with_owner(change.to_owner())
            };
        });
    }

    /// Records that list `peer_id` as an owner.
    pub fn owned_by(&self, peer_id: &PeerId) -> Vec<PhotoRecord> {
        self.snapshot()
            .iter()
            .filter(|p| p.has_owner(peer_id))
            .cloned()
            .collect()
    }
}
