use thiserror::Error;

use crate::lifecycle::PhotoState;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown push channel: {0}")]
    UnknownChannel(String),

    #[error("Update type {kind} is not valid on channel {channel}")]
    UnsupportedUpdate { channel: String, kind: String },

    #[error("Malformed push payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Invalid lifecycle transition for {info_hash}: {from:?} -> {to:?}")]
    InvalidTransition {
        info_hash: String,
        from: PhotoState,
        to: PhotoState,
    },
}
