//! Data model and wire protocol shared by the snapmesh client, store and
//! coordination server.

pub mod constants;
pub mod content_id;
pub mod error;
pub mod lifecycle;
pub mod photo;
pub mod protocol;
pub mod room;
pub mod types;

pub use error::{LifecycleError, ProtocolError};
pub use lifecycle::PhotoState;
pub use photo::PhotoRecord;
pub use types::*;
