//! Binary entrypoint for the PCA server.
use anyhow::Context;
use pca_api::{run, AppState};
use pca_core::EngineConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Default listen address can be overridden with PCA_ADDR
    let addr = std::env::var("PCA_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

    let file = match std::env::var("PCA_CONFIG") {
        Ok(path) => Some(
            EngineConfig::load(&path).with_context(|| format!("loading config from {path}"))?,
        ),
        Err(_) => None,
    };
    let config = AppState::server_config(file)
        .with_overrides(|key| std::env::var(key).ok())
        .context("reading PCA_* overrides")?;

    let state = AppState::new(config).context("building orchestrator")?;
    run(&addr, state)
        .await
        .with_context(|| format!("serving on {addr}"))
}
