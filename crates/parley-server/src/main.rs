mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::health;
use parley_api::participants;
use parley_api::state::{AppState, AppStateInner};
use parley_gateway::connection;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.web_origins.is_empty() {
        info!("Web origin: * (any)");
    } else {
        info!("Web origins: {}", config.web_origins.join(", "));
    }

    // Init database
    let db = Arc::new(parley_db::Database::open(&config.db_path)?);

    // Shared state
    let state = AppStateInner::new(db);

    let app = Router::new()
        .route("/", get(health::health))
        .route("/participants", get(participants::list_participants))
        .route("/gateway", get(ws_upgrade))
        .with_state(state)
        .layer(config.cors_layer()?)
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Parley relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let relay = state.relay.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, relay))
}
