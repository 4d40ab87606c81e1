//! SecureShare server entry point.

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::{header::HeaderValue, Method};
use axum::Router;
use tokio::signal;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{
    compression::{CompressionLayer, CompressionLevel},
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use secure_share::api::{create_routes, AppState};
use secure_share::config::{close_cache, close_db, init_cache, init_db, APP_CONFIG};
use secure_share::error::AppResult;
use secure_share::sweeper::spawn_expiry_sweeper;

// High-performance memory allocator for non-MSVC targets
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Methods the browser page and API clients use.
const CORS_METHODS: [Method; 4] = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];

/// Entry point for the SecureShare server.
#[tokio::main(flavor = "multi_thread")]
async fn main() {
    init_tracing();
    let _sentry = init_sentry();

    let state = match init_state().await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize storage");
            std::process::exit(1);
        }
    };

    // Purge expired shares in the background
    let sweeper = spawn_expiry_sweeper(
        state.db.clone(),
        Duration::from_secs(APP_CONFIG.sweep_interval_secs),
    );

    let app = build_app(state);

    let port: u16 = APP_CONFIG.server_port.parse().unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(
        port = port,
        share_ttl_hours = APP_CONFIG.share_ttl_hours,
        max_upload_bytes = APP_CONFIG.max_upload_bytes,
        rate_limit_per_second = APP_CONFIG.rate_limit_per_second,
        rate_limit_burst = APP_CONFIG.rate_limit_burst_size,
        "Starting server"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    // ConnectInfo feeds both the rate limiter and the lookup throttle
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    tracing::info!("Shutting down...");

    sweeper.abort();
    close_db().await;
    close_cache();

    // Flush Sentry events before exit
    if let Some(client) = sentry::Hub::current().client() {
        client.flush(Some(Duration::from_secs(2)));
    }

    tracing::info!("Shutdown complete");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secure_share=debug,tower_http=debug,axum=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Starts Sentry when a DSN is configured. Keep the guard alive until exit.
fn init_sentry() -> Option<sentry::ClientInitGuard> {
    if APP_CONFIG.sentry_dsn.is_empty() {
        tracing::warn!("Sentry DSN not configured, error tracking disabled");
        return None;
    }

    Some(sentry::init((
        APP_CONFIG.sentry_dsn.clone(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            traces_sample_rate: APP_CONFIG.sentry_traces_sample_rate,
            sample_rate: 1.0,
            ..Default::default()
        },
    )))
}

/// Connects Postgres and Redis and applies pending migrations.
async fn init_state() -> AppResult<AppState> {
    let db = init_db().await?;

    if APP_CONFIG.run_migrations {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .map_err(sqlx::Error::from)?;
        tracing::info!("Database migrations completed");
    }

    let cache = init_cache().await?;

    Ok(AppState::new(db, cache))
}

/// Wraps the routes in the HTTP middleware stack.
///
/// Layer order (bottom to top execution): CORS -> Compression -> Trace -> Rate Limit
fn build_app(state: AppState) -> Router {
    let governor_config = GovernorConfigBuilder::default()
        .per_second(APP_CONFIG.rate_limit_per_second)
        .burst_size(APP_CONFIG.rate_limit_burst_size)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("Failed to build rate limiter config");

    create_routes(state)
        .layer(build_cors_layer())
        .layer(
            CompressionLayer::new()
                .br(true)
                .gzip(true)
                .zstd(true)
                .quality(CompressionLevel::Default),
        )
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_config))
}

/// Builds the CORS layer based on configuration.
///
/// `*`, or a list with no parsable origin, allows every origin.
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods(CORS_METHODS)
        .allow_headers(Any);

    let cors_origins = &APP_CONFIG.cors_origins;
    if cors_origins == "*" {
        tracing::warn!("CORS is configured to allow all origins - not recommended for production");
        return base.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = cors_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    if origins.is_empty() {
        tracing::warn!("No valid CORS origins configured, allowing all");
        base.allow_origin(Any)
    } else {
        tracing::info!(origins = ?origins, "CORS configured with specific origins");
        base.allow_origin(origins)
    }
}

/// Handles shutdown signals for graceful termination.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        },
    }
}
