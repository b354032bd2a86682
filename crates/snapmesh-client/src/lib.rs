pub mod addition;
pub mod config;
pub mod coordinator;
pub mod deletion;
pub mod engine;
pub mod error;
pub mod events;
pub mod session;
pub mod state;
pub mod store;
pub mod throttle;
pub mod thumbnail;

#[cfg(test)]
pub(crate) mod testing;

pub use addition::{AddOutcome, Seeded};
pub use config::ClientConfig;
pub use coordinator::{Coordinator, ReconcileSummary, ResurrectionSummary};
pub use engine::{ContentEngine, MemoryEngine, SourceFile, TransferHandle};
pub use error::ContentError;
pub use events::ContentEvent;
pub use store::{DescriptorStore, SqliteStore};
pub use thumbnail::{NoThumbnails, ThumbnailExtractor};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("snapmesh_client=debug,snapmesh_net=debug,snapmesh_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
