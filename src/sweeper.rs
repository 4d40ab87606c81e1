//! Background purge of expired shares.

use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::models::ShareRepository;

/// Spawns a task that deletes expired shares every `interval`.
///
/// The first sweep runs immediately so shares that expired while the server
/// was down are purged at start-up. Abort the returned handle to stop it.
pub fn spawn_expiry_sweeper(db: PgPool, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            match ShareRepository::delete_expired(&db).await {
                Ok(0) => tracing::trace!("No expired shares to purge"),
                Ok(removed) => tracing::info!(removed, "Purged expired shares"),
                Err(e) => tracing::error!(error = %e, "Expired share sweep failed"),
            }
        }
    })
}
