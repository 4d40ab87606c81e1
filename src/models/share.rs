//! Share model module.
//!
//! Contains the share and file entities, the cached manifest, and the
//! repository for database operations.

use chrono::{DateTime, Utc};
use deadpool_redis::redis::{pipe, AsyncCommands};
use deadpool_redis::Connection;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use xxhash_rust::xxh3::xxh3_128;

use crate::config::APP_CONFIG;
use crate::error::AppResult;

/// Default content type for uploads that do not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Extra tombstone lifetime beyond the cache TTL, covering a manifest written
/// just after the share was deleted.
const TOMBSTONE_TTL_SECS: u64 = 60;

/// Share row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Share {
    pub id: i64,
    pub code_hash: String,
    pub owner: String,
    pub salt: Vec<u8>,
    pub encrypted: bool,
    pub kdf_iterations: i32,
    pub max_downloads: Option<i32>,
    pub download_count: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// File metadata without the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SharedFileMeta {
    pub position: i32,
    pub name: String,
    pub content_type: String,
    pub size: i64,
    pub checksum: String,
}

/// Struct for creating a new share record.
#[derive(Debug, Clone)]
pub struct NewShare {
    pub code_hash: String,
    pub owner: String,
    pub salt: Vec<u8>,
    pub encrypted: bool,
    pub kdf_iterations: i32,
    pub max_downloads: Option<i32>,
    pub expires_at: DateTime<Utc>,
}

/// A file ready to be stored. `data` is already sealed when the share is encrypted.
#[derive(Debug, Clone)]
pub struct NewSharedFile {
    pub name: String,
    pub content_type: String,
    pub size: i64,
    pub checksum: String,
    pub data: Vec<u8>,
}

/// Share manifest cached in Redis (MessagePack). Counters are not cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareCacheData {
    pub id: i64,
    pub code_hash: String,
    pub owner: String,
    pub salt: Vec<u8>,
    pub encrypted: bool,
    pub kdf_iterations: i32,
    pub max_downloads: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub files: Vec<SharedFileMeta>,
}

/// Result of counting a download against a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadGrant {
    pub download_count: i32,
    pub max_downloads: Option<i32>,
}

/// Integrity checksum stored alongside each file (xxh3-128, hex).
#[must_use]
pub fn checksum(data: &[u8]) -> String {
    format!("{:032x}", xxh3_128(data))
}

impl ShareCacheData {
    /// Assembles the manifest from a share row and its files.
    #[must_use]
    pub fn from_parts(share: Share, files: Vec<SharedFileMeta>) -> Self {
        Self {
            id: share.id,
            code_hash: share.code_hash,
            owner: share.owner,
            salt: share.salt,
            encrypted: share.encrypted,
            kdf_iterations: share.kdf_iterations,
            max_downloads: share.max_downloads,
            created_at: share.created_at,
            expires_at: share.expires_at,
            files,
        }
    }

    /// Redis key for a share manifest.
    #[must_use]
    pub fn cache_key(code_hash: &str) -> String {
        format!("shares:{code_hash}")
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Seconds until expiry, never negative.
    #[must_use]
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    /// Looks up a file by its download position.
    #[must_use]
    pub fn file(&self, position: i32) -> Option<&SharedFileMeta> {
        self.files.iter().find(|f| f.position == position)
    }

    /// Total plaintext size of every file in the share.
    #[must_use]
    pub fn total_size(&self) -> i64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Cache lifetime: the configured TTL, but never past the share's expiry.
    #[must_use]
    pub fn cache_ttl_secs(&self, now: DateTime<Utc>, max_ttl_secs: u64) -> u64 {
        u64::try_from(self.remaining_secs(now))
            .unwrap_or(0)
            .min(max_ttl_secs)
    }

    /// Redis key marking a deleted share. It outlives any cached manifest,
    /// so a manifest cached by a racing lookup is never served.
    #[must_use]
    pub fn tombstone_key(code_hash: &str) -> String {
        format!("shares:deleted:{code_hash}")
    }

    /// Reads a cached manifest. Misses, decode failures and deleted shares
    /// all yield `None`.
    pub async fn load_cached(conn: &mut Connection, code_hash: &str) -> Option<Self> {
        let (cached, deleted): (Option<Vec<u8>>, bool) = pipe()
            .get(Self::cache_key(code_hash))
            .exists(Self::tombstone_key(code_hash))
            .query_async(conn)
            .await
            .ok()?;

        if deleted {
            return None;
        }
        let cached = cached.filter(|bytes| !bytes.is_empty())?;
        rmp_serde::from_slice(&cached).ok()
    }

    /// Caches the manifest until it would expire. Failures are logged only.
    pub async fn store_cached(&self, conn: &mut Connection) {
        let ttl = self.cache_ttl_secs(Utc::now(), APP_CONFIG.cache_ttl_secs);
        if ttl == 0 {
            return;
        }

        let deleted: bool = conn
            .exists(Self::tombstone_key(&self.code_hash))
            .await
            .unwrap_or(false);
        if deleted {
            return;
        }

        let cache_key = Self::cache_key(&self.code_hash);
        match rmp_serde::to_vec(self) {
            Ok(data) => {
                let cache_result: Result<(), deadpool_redis::redis::RedisError> =
                    conn.set_ex(&cache_key, data, ttl).await;

                if let Err(e) = cache_result {
                    tracing::error!(
                        share_id = self.id,
                        error = %e,
                        "Failed to cache share manifest - DB load may increase"
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    share_id = self.id,
                    error = %e,
                    "Failed to serialize share manifest for cache"
                );
            }
        }
    }

    /// Marks a share as deleted and drops its cached manifest, so revoked or
    /// used-up shares vanish immediately.
    pub async fn retire(conn: &mut Connection, code_hash: &str) {
        let result: Result<(), deadpool_redis::redis::RedisError> = pipe()
            .set_ex(Self::tombstone_key(code_hash), 1u8, TOMBSTONE_TTL_SECS + APP_CONFIG.cache_ttl_secs)
            .ignore()
            .del(Self::cache_key(code_hash))
            .ignore()
            .query_async(conn)
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to retire share manifest in cache");
        }
    }
}

impl DownloadGrant {
    /// True once this download used the last permitted one.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.max_downloads
            .is_some_and(|max| self.download_count >= max)
    }

    /// Downloads left after this one, if the share is limited.
    #[must_use]
    pub fn remaining(&self) -> Option<i32> {
        self.max_downloads
            .map(|max| (max - self.download_count).max(0))
    }
}

/// Share repository for database operations.
pub struct ShareRepository;

impl ShareRepository {
    /// Inserts a share and its files in one transaction.
    ///
    /// An expired share still holding the same code hash is purged first.
    /// Returns `None` when a live share already owns the code, so the caller
    /// can retry with a fresh one.
    pub async fn create(
        pool: &sqlx::PgPool,
        new_share: &NewShare,
        files: &[NewSharedFile],
    ) -> AppResult<Option<Share>> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM shares WHERE code_hash = $1 AND expires_at <= NOW()")
            .bind(&new_share.code_hash)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query_as::<_, Share>(
            r"
            INSERT INTO shares (
                code_hash, owner, salt, encrypted, kdf_iterations,
                max_downloads, download_count, created_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 0, NOW(), $7)
            ON CONFLICT (code_hash) DO NOTHING
            RETURNING id, code_hash, owner, salt, encrypted, kdf_iterations,
                      max_downloads, download_count, created_at, expires_at
            ",
        )
        .bind(&new_share.code_hash)
        .bind(&new_share.owner)
        .bind(&new_share.salt)
        .bind(new_share.encrypted)
        .bind(new_share.kdf_iterations)
        .bind(new_share.max_downloads)
        .bind(new_share.expires_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(share) = inserted else {
            tx.rollback().await?;
            return Ok(None);
        };

        for (position, file) in files.iter().enumerate() {
            let position = i32::try_from(position).unwrap_or(i32::MAX);
            sqlx::query(
                r"
                INSERT INTO shared_files (
                    share_id, position, name, content_type, size, checksum, data
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(share.id)
            .bind(position)
            .bind(&file.name)
            .bind(&file.content_type)
            .bind(file.size)
            .bind(&file.checksum)
            .bind(&file.data)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(share))
    }

    /// Finds a share manifest by code hash. Expired shares are returned too;
    /// the caller decides how to answer.
    pub async fn find_by_code_hash(
        pool: &sqlx::PgPool,
        code_hash: &str,
    ) -> AppResult<Option<ShareCacheData>> {
        let share = sqlx::query_as::<_, Share>(
            r"
            SELECT id, code_hash, owner, salt, encrypted, kdf_iterations,
                   max_downloads, download_count, created_at, expires_at
            FROM shares
            WHERE code_hash = $1
            LIMIT 1
            ",
        )
        .bind(code_hash)
        .fetch_optional(pool)
        .await?;

        let Some(share) = share else {
            return Ok(None);
        };

        let files = sqlx::query_as::<_, SharedFileMeta>(
            r"
            SELECT position, name, content_type, size, checksum
            FROM shared_files
            WHERE share_id = $1
            ORDER BY position
            ",
        )
        .bind(share.id)
        .fetch_all(pool)
        .await?;

        Ok(Some(ShareCacheData::from_parts(share, files)))
    }

    /// Current download count, or `None` if the share is gone.
    pub async fn download_count(pool: &sqlx::PgPool, share_id: i64) -> AppResult<Option<i32>> {
        let count = sqlx::query_scalar::<_, i32>("SELECT download_count FROM shares WHERE id = $1")
            .bind(share_id)
            .fetch_optional(pool)
            .await?;

        Ok(count)
    }

    /// Loads the stored payload of one file.
    pub async fn load_file_data(
        pool: &sqlx::PgPool,
        share_id: i64,
        position: i32,
    ) -> AppResult<Option<Vec<u8>>> {
        let data = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT data FROM shared_files WHERE share_id = $1 AND position = $2",
        )
        .bind(share_id)
        .bind(position)
        .fetch_optional(pool)
        .await?;

        Ok(data)
    }

    /// Loads every stored payload of a share, ordered by position.
    pub async fn load_all_file_data(
        pool: &sqlx::PgPool,
        share_id: i64,
    ) -> AppResult<Vec<(i32, Vec<u8>)>> {
        let rows = sqlx::query_as::<_, (i32, Vec<u8>)>(
            "SELECT position, data FROM shared_files WHERE share_id = $1 ORDER BY position",
        )
        .bind(share_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Counts one download if the share is still live and not used up.
    ///
    /// The conditional update makes concurrent downloads of a one-time share
    /// race safely: exactly one of them gets a grant.
    pub async fn register_download(
        pool: &sqlx::PgPool,
        share_id: i64,
    ) -> AppResult<Option<DownloadGrant>> {
        let row = sqlx::query_as::<_, (i32, Option<i32>)>(
            r"
            UPDATE shares
            SET download_count = download_count + 1
            WHERE id = $1
              AND expires_at > NOW()
              AND (max_downloads IS NULL OR download_count < max_downloads)
            RETURNING download_count, max_downloads
            ",
        )
        .bind(share_id)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|(download_count, max_downloads)| DownloadGrant {
            download_count,
            max_downloads,
        }))
    }

    /// Deletes a share and, by cascade, its files.
    pub async fn delete(pool: &sqlx::PgPool, share_id: i64) -> AppResult<()> {
        sqlx::query("DELETE FROM shares WHERE id = $1")
            .bind(share_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Deletes a share only if `owner` created it. Returns whether a row went away.
    pub async fn delete_owned(
        pool: &sqlx::PgPool,
        code_hash: &str,
        owner: &str,
    ) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM shares WHERE code_hash = $1 AND owner = $2")
            .bind(code_hash)
            .bind(owner)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Purges every expired share. Returns how many were removed.
    pub async fn delete_expired(pool: &sqlx::PgPool) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM shares WHERE expires_at <= NOW()")
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
