//! Redis 캐시 설정 모듈.

use crate::config::env::{get_env, APP_CONFIG};
use crate::error::{AppError, AppResult};
use deadpool_redis::{Config, Pool, PoolConfig, Runtime};
use once_cell::sync::OnceCell;

static CACHE_POOL: OnceCell<Pool> = OnceCell::new();

/// Builds the Redis connection URL from `REDIS_URL` or the `REDIS_*` parts.
pub fn redis_url() -> String {
    let url = get_env("REDIS_URL", None);
    if !url.is_empty() {
        return url;
    }

    let host = get_env("REDIS_HOST", Some("localhost"));
    let port = get_env("REDIS_PORT", Some("6379"));
    let password = get_env("REDIS_PASSWORD", None);

    if password.is_empty() {
        format!("redis://{host}:{port}")
    } else {
        format!("redis://:{password}@{host}:{port}")
    }
}

/// Creates a pool without opening a connection.
pub fn build_cache_pool(url: &str) -> AppResult<Pool> {
    let mut cfg = Config::from_url(url);
    cfg.pool = Some(PoolConfig {
        max_size: APP_CONFIG.redis_max_connections,
        ..PoolConfig::default()
    });

    cfg.create_pool(Some(Runtime::Tokio1))
        .map_err(|e| AppError::Internal(format!("Redis pool error: {e}")))
}

/// Initializes the Redis connection pool and verifies connectivity.
///
/// The pool is cached in a global `OnceCell`; later calls return a clone.
pub async fn init_cache() -> AppResult<Pool> {
    if let Some(pool) = CACHE_POOL.get() {
        return Ok(pool.clone());
    }

    let pool = build_cache_pool(&redis_url())?;

    let conn = pool.get().await.map_err(|e| {
        AppError::Internal(format!("Redis connection test failed: {e}"))
    })?;
    drop(conn);

    CACHE_POOL.set(pool.clone()).ok();
    tracing::info!(
        max_connections = APP_CONFIG.redis_max_connections,
        "Redis connection pool established"
    );

    Ok(pool)
}

/// Closes the Redis connection pool.
pub fn close_cache() {
    if let Some(pool) = CACHE_POOL.get() {
        pool.close();
    }
    tracing::info!("Redis connection pool closed");
}
