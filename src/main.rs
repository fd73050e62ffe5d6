use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use h2h_suppress::AppState;
use h2h_suppress::config::EngineConfig;
use h2h_suppress::cube_store::CubeStore;
use h2h_suppress::handlers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("h2h_suppress=debug,tower_http=debug")
        }))
        .init();

    let config_path =
        std::env::var("SUPPRESS_CONFIG").unwrap_or_else(|_| "./suppress.toml".to_string());
    let config = EngineConfig::load(&config_path)?;

    let db_path = std::env::var("SUPPRESS_DB").unwrap_or(config.storage.db_path.clone());
    let rounds_dir =
        std::env::var("SUPPRESS_ROUNDS_DIR").unwrap_or(config.storage.rounds_dir.clone());

    let store = Arc::new(CubeStore::open(&db_path)?);
    tracing::info!("cube store opened at {db_path}");

    let state = AppState {
        store,
        rounds_dir: PathBuf::from(rounds_dir),
        plan: config.plan.clone(),
    };

    let app = Router::new()
        // Scanner and its planner-facing projection
        .route("/api/v1/scan", post(handlers::scan::scan_outliers))
        .route("/api/v1/enriched", post(handlers::scan::enriched_projection))
        // Plan building and persistence
        .route("/api/v1/plan/build", post(handlers::plans::build))
        .route("/api/v1/plan/save", post(handlers::plans::save))
        // Preview reconstruction
        .route("/api/v1/preview", post(handlers::preview::reconstruct))
        // Cube inventory and read-only query surface
        .route("/api/v1/cubes", get(handlers::cubes::list_cubes))
        .route("/api/v1/query", post(handlers::cubes::execute_query))
        .route("/api/v1/rounds", get(handlers::rounds::list_rounds))
        .route("/api/v1/rounds/{name}", get(handlers::rounds::get_round))
        // Health
        .route("/healthz", get(handlers::health::healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8087);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("suppress-api listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
