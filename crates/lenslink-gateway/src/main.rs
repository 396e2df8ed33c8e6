//! LensLink gateway binary: HTTP + WebSocket server wiring.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lenslink_gateway::registry::{Registry, SharedRegistry};
use lenslink_gateway::state::{CapsDoc, ConfigDoc, SharedCaps, SharedConfig};
use lenslink_gateway::{liveness, signal, web};

#[derive(Parser, Debug)]
#[command(name = "lenslink-gateway")]
#[command(about = "Relays WebRTC signaling between a camera producer and a browser viewer")]
struct Args {
    /// HTTP/WebSocket listen address
    #[arg(long, env = "LENSLINK_BIND_ADDR", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Seconds between liveness probe sweeps
    #[arg(long, default_value_t = 30)]
    probe_interval_secs: u64,

    /// Directory served as the viewer UI
    #[arg(long, env = "LENSLINK_WEB_ROOT", default_value = "public")]
    web_root: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone)]
struct AppState {
    registry: SharedRegistry,
    config: SharedConfig,
    caps: SharedCaps,
}

impl FromRef<AppState> for SharedRegistry {
    fn from_ref(state: &AppState) -> Self {
        state.registry.clone()
    }
}

impl FromRef<AppState> for SharedConfig {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for SharedCaps {
    fn from_ref(state: &AppState) -> Self {
        state.caps.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| format!("lenslink_gateway={},tower_http=warn", args.log_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting lenslink-gateway v{}", env!("CARGO_PKG_VERSION"));

    let state = AppState {
        registry: Arc::new(RwLock::new(Registry::new())),
        config: Arc::new(RwLock::new(ConfigDoc::default())),
        caps: Arc::new(RwLock::new(CapsDoc::default())),
    };

    let probe_interval = Duration::from_secs(args.probe_interval_secs.max(1));
    tokio::spawn(liveness::run(state.registry.clone(), probe_interval));

    let app = Router::new()
        .route("/api/config", get(web::get_config).post(web::post_config))
        .route("/api/caps", get(web::get_caps))
        .route("/api/caps/refresh", post(web::refresh_caps))
        .route("/health", get(web::health))
        .route("/ws", get(signal::ws_handler))
        .fallback_service(ServeDir::new(&args.web_root))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(args.listen).await?;
    tracing::info!("gateway listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
