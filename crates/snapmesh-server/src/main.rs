use tracing::info;
use tracing_subscriber::EnvFilter;

use snapmesh_server::{serve, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,snapmesh_server=debug")),
        )
        .init();

    info!("Starting snapmesh coordination server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let addr = config.http_addr;
    let state = AppState::new(config);

    tokio::select! {
        result = serve(state, addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, exiting");
        }
    }

    Ok(())
}
