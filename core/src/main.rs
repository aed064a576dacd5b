use allowances_core::api::{self, AppState};
use allowances_core::chain_reader::RpcBalanceReader;
use allowances_core::rpc_provider::ProviderRegistry;
use allowances_core::settings::load_config;
use allowances_core::{BalanceCache, FetchOrchestrator, TokenRegistry};
use std::env;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    // -------------------------------
    // Load configuration
    // -------------------------------
    let config = load_config().expect("Failed to load configuration");

    // -------------------------------
    // Initialize Tracing / Logging
    // -------------------------------
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", &config.rust_log);
    }

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        port = config.server_port,
        round_to_decimals = config.round_to_decimals,
        "Allowances service starting"
    );

    // -------------------------------
    // Chain access
    // -------------------------------
    let providers = config.providers();
    tracing::info!(providers = providers.len(), "RPC providers configured");
    if providers.is_empty() {
        tracing::error!("No RPC providers configured, set RPC_URLS");
        return;
    }
    let registry = ProviderRegistry::new(providers);
    let _health_checker = registry.spawn_health_checker(config.health_check_interval());
    let reader = Arc::new(RpcBalanceReader::new(
        Arc::clone(&registry),
        config.request_timeout(),
    ));

    // -------------------------------
    // Session state
    // -------------------------------
    let cache = BalanceCache::new();
    let _stats_logger = cache.spawn_stats_logger(config.stats_interval());
    let state = AppState {
        orchestrator: FetchOrchestrator::new(cache, reader),
        tokens: TokenRegistry::new(),
        round_to_decimals: config.round_to_decimals,
    };

    let cors = CorsLayer::new().allow_origin(Any);
    let app = api::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // -------------------------------
    // Run Server
    // -------------------------------
    let bind_addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on http://{}", bind_addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}
