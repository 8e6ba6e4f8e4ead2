use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use hub_server::config::{FileConfig, load_config};
use hub_server::{AppState, create_router};
use realtime_hub::Hub;

/// Gives every request span a unique id so log lines can be correlated.
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "hub")]
#[command(about = "Realtime private-message hub for storefront clients")]
struct Args {
    /// Directory containing hub.toml
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    /// Host to bind to (overrides hub.toml / HUB_SERVER__HOST)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the HTTP server (overrides hub.toml / HUB_SERVER__PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let default_directive = if args.debug {
        "hub=debug,hub_server=debug,realtime_hub=debug,tower_http=debug,info"
    } else {
        "hub=info,hub_server=info,realtime_hub=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config: FileConfig = load_config(&args.config_dir)
        .extract()
        .context("Failed to load configuration")?;
    let config = config.with_overrides(args.host, args.port);
    let addr = config.listen_addr()?;

    let hub = Hub::spawn(config.hub.to_hub_config());
    info!(
        queue_capacity = hub.config().outbound_queue_capacity,
        "Realtime hub started"
    );

    let app = create_router(AppState { hub: hub.clone() })
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Hub listening on http://{}", actual_addr);
    info!("  GET    /ws?user_id=&username=  - WebSocket connection");
    info!("  POST   /api/messages/realtime  - Push a message to an online user");
    info!("  GET    /health                 - Health check");
    info!("  GET    /metrics                - Hub counters");

    // Closing every queue first lets each client receive a close frame
    let shutdown_hub = hub.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down...");
        if let Err(e) = shutdown_hub.shutdown().await {
            warn!("Hub already stopped: {}", e);
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Hub stopped");
    Ok(())
}
