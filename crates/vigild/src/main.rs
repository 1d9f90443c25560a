use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod facts;
mod gate;
mod generate;
mod http;
mod interview;
mod lifecycle;
mod notify;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("vigild starting");

    let config = config::Config::load().context("loading configuration")?;
    let state = http::AppState::new(config);
    let app = http::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&state.config.listen_addr)
        .await
        .with_context(|| format!("binding {}", state.config.listen_addr))?;
    tracing::info!(addr = %state.config.listen_addr, "http interface listening");
    tracing::info!("hit / to initialize the monitoring pipeline");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("http server failed")?;

    // Stop the pipeline thread and release the camera before exit.
    let lifecycle = state.lifecycle;
    tokio::task::spawn_blocking(move || lifecycle.shutdown())
        .await
        .ok();

    tracing::info!("vigild shut down");
    Ok(())
}
