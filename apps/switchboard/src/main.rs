use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use switchboard::archive::Archive;
use switchboard::cli::{self, Cli, Commands};
use switchboard::config::Config;
use switchboard::handlers;
use switchboard::hub::{self, Hub};

#[tokio::main]
async fn main() -> Result<()> {
    // Default to INFO so the connection narrative is visible out of the box.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let args = Cli::parse();
    if let Some(Commands::Probe {
        url,
        email,
        password,
        command,
        target,
    }) = args.command
    {
        return cli::run_probe(url, email, password, command, target).await;
    }

    let config = Arc::new(Config::from_env());
    info!(port = config.port, "starting switchboard relay hub");

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;

    let archive = Archive::bootstrap(&config).context("failed to prepare data directories")?;
    let hub = Hub::new(config.clone(), archive);

    let http_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/agents", get(handlers::list_agents))
        .route("/api/login", post(handlers::login))
        .with_state(hub.clone());

    let ws_routes = Router::new()
        .route("/ws", get(hub::websocket_handler))
        .with_state(hub);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics))
        .with_state(metrics_handle);

    let app = Router::new()
        .merge(http_routes)
        .merge(ws_routes)
        .merge(metrics_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "switchboard listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
