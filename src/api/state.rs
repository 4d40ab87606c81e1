//! Application state module.
//!
//! Contains shared state for database and cache connections.

use deadpool_redis::Pool as RedisPool;
use sqlx::PgPool;

/// Shared application state.
///
/// Shares and file payloads live in Postgres; Redis holds cached manifests
/// and the lookup failure counters.
#[derive(Clone)]
pub struct AppState {
    /// `PostgreSQL` connection pool
    pub db: PgPool,
    /// Redis connection pool (manifest cache, lookup throttle)
    pub cache: RedisPool,
}

impl AppState {
    /// Creates a new `AppState` instance.
    #[must_use]
    pub const fn new(db: PgPool, cache: RedisPool) -> Self {
        Self { db, cache }
    }
}
