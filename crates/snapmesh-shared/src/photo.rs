//! The shared item record.
//!
//! On the wire a record is the flat JSON object the coordination server
//! stores. Locally the `loading`/`rendering` flags are derived from an
//! explicit [`PhotoState`], and the engine file the record is bound to is
//! kept next to it but never serialised.

use serde::{Deserialize, Serialize};

use crate::content_id;
use crate::error::LifecycleError;
use crate::lifecycle::PhotoState;
use crate::types::{Owner, PeerId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PhotoWire", into = "PhotoWire")]
pub struct PhotoRecord {
    pub info_hash: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub owners: Vec<Owner>,
    pub seed: bool,
    pub secure: bool,
    pub from_cache: bool,
    pub upload_error: Option<String>,
    pub state: PhotoState,
    /// Path of the engine file this record is bound to, once metadata is known.
    pub bound_file: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhotoWire {
    info_hash: String,
    #[serde(default)]
    file_name: String,
    #[serde(default)]
    file_type: String,
    #[serde(default)]
    file_size: u64,
    #[serde(default)]
    owners: Vec<Owner>,
    #[serde(default)]
    seed: bool,
    #[serde(default)]
    secure: bool,
    #[serde(default)]
    loading: bool,
    #[serde(default)]
    rendering: bool,
    #[serde(default)]
    from_cache: bool,
    #[serde(default)]
    upload_error: Option<String>,
}

impl From<PhotoWire> for PhotoRecord {
    fn from(w: PhotoWire) -> Self {
        // The server's flags describe the uploader's copy, not ours: a record
        // arriving over the wire is at most `Added` locally.
        let state = if w.upload_error.is_some() {
            PhotoState::Failed
        } else if content_id::is_placeholder(&w.info_hash) {
            PhotoState::Placeholder
        } else {
            PhotoState::Added
        };

        Self {
            info_hash: w.info_hash,
            file_name: w.file_name,
            file_type: w.file_type,
            file_size: w.file_size,
            owners: w.owners,
            seed: w.seed,
            secure: w.secure,
            from_cache: w.from_cache,
            upload_error: w.upload_error,
            state,
            bound_file: None,
        }
    }
}

impl From<PhotoRecord> for PhotoWire {
    fn from(r: PhotoRecord) -> Self {
        Self {
            loading: r.state.is_loading(),
            rendering: r.state.is_rendering(),
            info_hash: r.info_hash,
            file_name: r.file_name,
            file_type: r.file_type,
            file_size: r.file_size,
            owners: r.owners,
            seed: r.seed,
            secure: r.secure,
            from_cache: r.from_cache,
            upload_error: r.upload_error,
        }
    }
}

impl PhotoRecord {
    /// Record for an item `info_hash` learned about from elsewhere.
    pub fn new(
        info_hash: impl Into<String>,
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        file_size: u64,
    ) -> Self {
        Self {
            info_hash: info_hash.into(),
            file_name: file_name.into(),
            file_type: file_type.into(),
            file_size,
            owners: Vec::new(),
            seed: false,
            secure: false,
            from_cache: false,
            upload_error: None,
            state: PhotoState::Added,
            bound_file: None,
        }
    }

    /// Optimistic record shown while a local upload is being prepared.
    pub fn placeholder(
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        file_size: u64,
        secure: bool,
    ) -> Self {
        Self {
            seed: true,
            secure,
            state: PhotoState::Placeholder,
            ..Self::new(content_id::placeholder_id(), file_name, file_type, file_size)
        }
    }

    pub fn base_hash(&self) -> &str {
        content_id::base_hash(&self.info_hash)
    }

    pub fn is_placeholder(&self) -> bool {
        content_id::is_placeholder(&self.info_hash)
    }

    pub fn is_loading(&self) -> bool {
        self.state.is_loading()
    }

    pub fn is_rendering(&self) -> bool {
        self.state.is_rendering()
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow.
    pub fn advance(&mut self, next: PhotoState) -> Result<(), LifecycleError> {
        if !self.state.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                info_hash: self.info_hash.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Mark the record failed with a user-visible reason.
    ///
    /// A record that already reached `Ready` keeps its state; only the error
    /// is attached.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.upload_error = Some(reason.into());
        if self.state.can_transition_to(PhotoState::Failed) {
            self.state = PhotoState::Failed;
        }
    }

    pub fn owner(&self, peer_id: &PeerId) -> Option<&Owner> {
        self.owners.iter().find(|o| &o.peer_id == peer_id)
    }

    pub fn has_owner(&self, peer_id: &PeerId) -> bool {
        self.owner(peer_id).is_some()
    }

    /// Copy of this record with `owner` inserted, replacing any entry for the
    /// same peer.
    pub fn with_owner(&self, owner: Owner) -> Self {
        let mut next = self.clone();
        match next.owners.iter_mut().find(|o| o.peer_id == owner.peer_id) {
            Some(existing) => *existing = owner,
            None => next.owners.push(owner),
        }
        next
    }

    pub fn without_owner(&self, peer_id: &PeerId) -> Self {
        let mut next = self.clone();
        next.owners.retain(|o| &o.peer_id != peer_id);
        next
    }

    /// Take server-owned fields from `remote` while keeping local lifecycle
    /// state and file binding.
    pub fn merged_with(&self, remote: &PhotoRecord) -> Self {
        Self {
            info_hash: remote.info_hash.clone(),
            file_name: remote.file_name.clone(),
            file_type: remote.file_type.clone(),
            file_size: remote.file_size,
            owners: remote.owners.clone(),
            seed: self.seed || remote.seed,
            secure: remote.secure,
            from_cache: self.from_cache,
            upload_error: self.upload_error.clone().or_else(|| remote.upload_error.clone()),
            state: self.state,
            bound_file: self.bound_file.clone(),
        }
    }
}
