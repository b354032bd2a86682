use thiserror::Error;

use snapmesh_shared::ProtocolError;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Coordination server unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Coordination server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Push protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("ICE gathering failed: {0}")]
    Gathering(String),

    #[error("Invalid ICE candidate: {0}")]
    Candidate(String),
}

impl NetError {
    /// Whether the failure means the server could not be reached at all, as
    /// opposed to the server refusing the request.
    pub fn is_unreachable(&self) -> bool {
        match self {
            NetError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            NetError::RoomNotFound(_) => true,
            NetError::Status { status, .. } => *status == 404,
            _ => false,
        }
    }
}

impl From<webrtc::Error> for NetError {
    fn from(e: webrtc::Error) -> Self {
        NetError::Gathering(e.to_string())
    }
}
