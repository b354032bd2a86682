use thiserror::Error;

use snapmesh_net::NetError;
use snapmesh_shared::LifecycleError;
use snapmesh_store::StoreError;

use crate::engine::EngineError;

/// Failures surfaced by the content core.
///
/// Duplicate content never appears here: an engine duplicate is merged into
/// the existing item and reported as a [`crate::events::ContentEvent::Duplicate`].
#[derive(Error, Debug)]
pub enum ContentError {
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("No valid file input")]
    NoInput,

    #[error("Upload of {info_hash} failed: {reason}")]
    Upload { info_hash: String, reason: String },

    #[error("Could not resurrect {info_hash}: {reason}")]
    Resurrection { info_hash: String, reason: String },

    #[error("Unknown item: {0}")]
    UnknownItem(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Thumbnail extraction failed: {0}")]
    Thumbnail(String),
}

impl ContentError {
    /// Whether the coordination server could not be reached.
    pub fn is_network(&self) -> bool {
        matches!(self, ContentError::Network(_))
    }
}
