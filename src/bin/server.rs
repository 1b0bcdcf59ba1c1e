//! Binary entrypoint: load configuration, build the core, and serve the
//! REST API.

use hybrid_doc_qa::api::{create_router, AppState};
use hybrid_doc_qa::config::CoreConfig;
use hybrid_doc_qa::orchestrator::Core;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::var("CORE_CONFIG_PATH") {
        Ok(path) => CoreConfig::from_file(&path)?,
        Err(_) => CoreConfig::from_env(),
    };

    let host = config.server.host.clone();
    let port = config.server.port;

    let core = Core::new(config).await?;
    let state = AppState::new(Arc::new(core));
    let router = create_router(state);

    let addr = format!("{host}:{port}");
    tracing::info!(%addr, "starting hybrid-doc-qa server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
