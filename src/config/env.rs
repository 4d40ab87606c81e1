//! Environment variable configuration module.
//!
//! Provides environment variable loading and the global `APP_CONFIG` instance.

use std::env;
use std::net::IpAddr;
use std::sync::Once;

use once_cell::sync::Lazy;

use crate::utils::throttle::parse_ip_list;

static INIT: Once = Once::new();

/// Initializes the environment by loading the .env file.
/// This is called automatically when `get_env` is first used.
fn init_env() {
    INIT.call_once(|| {
        if let Err(e) = dotenvy::dotenv() {
            tracing::warn!("Warning: .env file not found or error loading: {}", e);
        }
    });
}

/// Retrieves an environment variable by key.
///
/// If the variable is not set, returns the provided default value.
/// If no default is provided and the variable is not set, returns an empty string.
pub fn get_env(key: &str, default: Option<&str>) -> String {
    init_env();
    env::var(key).unwrap_or_else(|_| default.unwrap_or("").to_string())
}

/// Retrieves an environment variable as a parsed type.
pub fn get_env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    init_env();
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Returns true when `RUST_ENV` names a production deployment.
pub fn is_production_env() -> bool {
    let rust_env = get_env("RUST_ENV", Some("development"));
    rust_env == "production" || rust_env == "prod"
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Server settings
    pub server_port: String,
    pub public_base_url: String,

    // Environment
    pub is_production: bool,

    // Sentry settings
    pub sentry_dsn: String,
    pub sentry_traces_sample_rate: f32,

    // Database settings
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub db_idle_timeout_secs: u64,
    pub db_max_lifetime_secs: u64,

    // Cache settings
    pub cache_ttl_secs: u64,
    pub redis_max_connections: usize,

    // CORS settings
    pub cors_origins: String,

    // Rate limiting
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,

    // Share lifecycle
    pub share_ttl_hours: u32,
    pub max_share_ttl_hours: u32,
    pub sweep_interval_secs: u64,

    // Upload limits
    pub max_upload_bytes: usize,
    pub max_files_per_share: usize,

    // Key derivation
    pub kdf_iterations: u32,

    // Brute-force protection for share code lookups
    pub lookup_failure_limit: u64,
    pub lookup_failure_window_secs: u64,
    /// Peers whose forwarding headers are believed.
    pub trusted_proxies: Vec<IpAddr>,

    // Migration
    pub run_migrations: bool,
}

impl AppConfig {
    /// Creates a new `AppConfig` from environment variables.
    pub fn from_env() -> Self {
        let share_ttl_hours: u32 = get_env_parsed("SHARE_TTL_HOURS", 24).max(1);

        Self {
            server_port: get_env("SERVER_PORT", Some("3000")),
            public_base_url: get_env("PUBLIC_BASE_URL", None)
                .trim_end_matches('/')
                .to_string(),

            is_production: is_production_env(),

            sentry_dsn: get_env("SENTRY_DSN", None),
            sentry_traces_sample_rate: get_env_parsed("SENTRY_TRACES_SAMPLE_RATE", 0.1),

            db_max_connections: get_env_parsed("DB_MAX_CONNECTIONS", 20),
            db_min_connections: get_env_parsed("DB_MIN_CONNECTIONS", 2),
            db_acquire_timeout_secs: get_env_parsed("DB_ACQUIRE_TIMEOUT_SECS", 5),
            db_idle_timeout_secs: get_env_parsed("DB_IDLE_TIMEOUT_SECS", 600),
            db_max_lifetime_secs: get_env_parsed("DB_MAX_LIFETIME_SECS", 1800),

            cache_ttl_secs: get_env_parsed("CACHE_TTL_SECS", 3600),
            redis_max_connections: get_env_parsed("REDIS_MAX_CONNECTIONS", 20),

            cors_origins: get_env("CORS_ORIGINS", Some("*")),

            rate_limit_per_second: get_env_parsed("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: get_env_parsed("RATE_LIMIT_BURST_SIZE", 50),

            share_ttl_hours,
            max_share_ttl_hours: get_env_parsed("MAX_SHARE_TTL_HOURS", 168)
                .max(share_ttl_hours),
            sweep_interval_secs: get_env_parsed("SWEEP_INTERVAL_SECS", 300).max(1),

            max_upload_bytes: get_env_parsed("MAX_UPLOAD_BYTES", 100 * 1024 * 1024),
            max_files_per_share: get_env_parsed("MAX_FILES_PER_SHARE", 20),

            // Stored per share in an INTEGER column
            kdf_iterations: get_env_parsed("KDF_ITERATIONS", 100_000)
                .clamp(1, i32::MAX.unsigned_abs()),

            lookup_failure_limit: get_env_parsed("LOOKUP_FAILURE_LIMIT", 10),
            lookup_failure_window_secs: get_env_parsed("LOOKUP_FAILURE_WINDOW_SECS", 600),
            trusted_proxies: parse_ip_list(&get_env("TRUSTED_PROXIES", None)),

            run_migrations: get_env("RUN_MIGRATIONS", Some("true")) == "true",
        }
    }
}

/// Global application configuration instance.
pub static APP_CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);
