//! Email verification API server
//!
//! HTTP facade over the recipient-probing engine: single and batch
//! verification endpoints, an SSE stream, persistent address/verdict
//! storage, and a background driver that revalidates expired entries.

use axum::Router;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use verifier_core::{EmailVerifier, VerdictCache};

mod api_handler;
mod config;
mod routes;
mod scheduler;
mod store;

use config::AppConfig;
use store::{EmailRegistry, SqliteVerdictStore};

/// Shared application state
pub struct AppState {
    pub cache: VerdictCache<EmailVerifier, SqliteVerdictStore>,
    pub registry: EmailRegistry,
    pub config: AppConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    init_tracing(&config)?;

    info!("Starting email verification API v{}", env!("CARGO_PKG_VERSION"));

    let verifier = Arc::new(EmailVerifier::new(config.verifier_config()?)?);

    let primary_pool = store::connect(&config.storage.primary_url).await?;
    let cache_pool = store::connect(&config.storage.cache_url).await?;
    let registry = EmailRegistry::new(primary_pool).await?;
    let verdict_store = SqliteVerdictStore::new(cache_pool).await?;
    let cache = VerdictCache::new(verifier, verdict_store, config.storage.cache_ttl_days);

    let state = Arc::new(AppState {
        cache,
        registry,
        config: config.clone(),
    });

    if config.scheduler.enabled {
        scheduler::spawn(state.clone());
    } else {
        info!("Validation driver disabled by configuration");
    }

    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Single verification: http://{}/email?email=...", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Create the main application router
fn create_router(state: Arc<AppState>) -> Router {
    routes::build_routes(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers(tower_http::cors::Any),
        )
        .layer(CompressionLayer::new())
}

/// Load application configuration from defaults, file, and environment
fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if std::path::Path::new("Config.toml").exists() {
        figment = figment.merge(Toml::file("Config.toml"));
    }

    figment = figment.merge(Env::prefixed("EVERIFY_").split("__"));

    let config: AppConfig = figment.extract()?;
    Ok(config)
}

/// Initialize tracing and logging
fn init_tracing(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.observability.log_level.clone().into());

    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
