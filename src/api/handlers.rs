//! HTTP request handler module.

use std::collections::HashMap;
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    Extension, Json,
};
use axum_extra::extract::CookieJar;
use chrono::{Duration, Utc};
use cookie::Cookie;
use deadpool_redis::Connection;
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use validator::Validate;

use crate::api::middlewares::{AuthUser, ClientIp, TOKEN_COOKIE};
use crate::api::schemas::{
    parse_positions, ArchiveQuery, CreateShareOptions, CreateShareResponse, FileEntry,
    ShareManifestResponse,
};
use crate::api::state::AppState;
use crate::config::APP_CONFIG;
use crate::error::{AppError, AppResult, ValidationErrorExt};
use crate::models::{
    checksum, DownloadGrant, NewShare, NewSharedFile, ShareCacheData, ShareRepository,
    DEFAULT_CONTENT_TYPE,
};
use crate::utils::share_code::CODE_GENERATION_ATTEMPTS;
use crate::utils::{
    build_zip, derive_key, gen_salt, gen_share_code, hash_share_code, open, render_data_uri,
    render_png, resolve_visitor, sanitize_file_name, seal, share_qr_payload, throttle,
    validate_share_code,
};

/// Longest content type stored as given; longer ones fall back to the default.
const MAX_CONTENT_TYPE_LEN: usize = 255;

/// Index page template.
#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    max_files: usize,
    max_upload_mb: usize,
    default_ttl_hours: u32,
    max_ttl_hours: u32,
}

/// Receive page template.
#[derive(Template)]
#[template(path = "receive.html")]
struct ReceiveTemplate {
    code: String,
    error: String,
    files: Vec<ReceiveFile>,
    total_size: String,
    expires_in: String,
    downloads_note: String,
    archive_url: String,
}

/// File row on the receive page.
#[derive(Clone)]
struct ReceiveFile {
    position: i32,
    name: String,
    size: String,
    download_url: String,
}

impl ReceiveTemplate {
    fn found(code: &str, share: &ShareCacheData, now: chrono::DateTime<Utc>) -> Self {
        Self {
            code: code.to_string(),
            error: String::new(),
            files: share
                .files
                .iter()
                .map(|meta| {
                    let entry = FileEntry::from_meta(code, meta);
                    ReceiveFile {
                        position: entry.position,
                        name: entry.name,
                        size: format_size(entry.size),
                        download_url: entry.download_url,
                    }
                })
                .collect(),
            total_size: format_size(share.total_size()),
            expires_in: format_remaining(share.remaining_secs(now)),
            downloads_note: match share.max_downloads {
                Some(1) => "This share can be downloaded once.".to_string(),
                Some(n) => format!("This share allows {n} downloads in total."),
                None => String::new(),
            },
            archive_url: format!("/v1/shares/{code}/archive"),
        }
    }

    fn failed(code: &str, message: String) -> Self {
        Self {
            code: code.to_string(),
            error: message,
            files: Vec::new(),
            total_size: String::new(),
            expires_in: String::new(),
            downloads_note: String::new(),
            archive_url: String::new(),
        }
    }
}

/// Formats a byte count the way the receive page lists sizes.
fn format_size(bytes: i64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let kib = bytes as f64 / 1024.0;
    if kib >= 1024.0 {
        format!("{:.2} MB", kib / 1024.0)
    } else {
        format!("{kib:.2} KB")
    }
}

/// Formats seconds until expiry as `Hh Mm`.
fn format_remaining(secs: i64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    format!("{hours}h {minutes}m")
}

/// Pre-rendered index page HTML (depends only on configuration).
static INDEX_HTML: Lazy<String> = Lazy::new(|| {
    IndexTemplate {
        max_files: APP_CONFIG.max_files_per_share,
        max_upload_mb: APP_CONFIG.max_upload_bytes / (1024 * 1024),
        default_ttl_hours: APP_CONFIG.share_ttl_hours,
        max_ttl_hours: APP_CONFIG.max_share_ttl_hours,
    }
    .render()
    .expect("Failed to render index template")
});

/// Builds the visitor cookie.
fn visitor_cookie(token: String) -> Cookie<'static> {
    let mut cookie_builder = Cookie::build((TOKEN_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(cookie::SameSite::Lax);

    // Enable Secure flag in production (HTTPS only)
    if APP_CONFIG.is_production {
        cookie_builder = cookie_builder.secure(true);
    }

    cookie_builder.build()
}

/// Main page handler.
///
/// Renders the send/receive page. A visitor keeps their identity while the
/// cookie is valid, so they can still revoke shares they created earlier.
///
/// # Route
///
/// `GET /`
pub async fn index_handler(jar: CookieJar) -> AppResult<impl IntoResponse> {
    let session = resolve_visitor(jar.get(TOKEN_COOKIE).map(|c| c.value()))?;

    let updated_jar = match session.new_token {
        Some(token) => {
            tracing::debug!(visitor = %session.subject, "Issued new visitor token");
            jar.add(visitor_cookie(token))
        }
        None => jar,
    };

    Ok((updated_jar, Html(INDEX_HTML.as_str())))
}

/// Gets a Redis connection, or `None` when Redis is down.
async fn cache_conn(state: &AppState) -> Option<Connection> {
    match state.cache.get().await {
        Ok(conn) => Some(conn),
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, continuing without cache");
            None
        }
    }
}

/// Resolves a share code to a live share.
///
/// Order: format check, throttle reservation, cache, database. Unknown and
/// expired codes keep their reserved slot in the caller's failure budget;
/// every other outcome hands it back.
async fn lookup_share(state: &AppState, code: &str, ip: &str) -> AppResult<ShareCacheData> {
    validate_share_code(code)?;

    let mut conn = cache_conn(state).await;
    let reserved = match conn.as_mut() {
        Some(conn) => throttle::reserve_attempt(conn, ip).await?,
        None => false,
    };

    let result = resolve_share(state, conn.as_mut(), code).await;

    let failed = matches!(result, Err(AppError::NotFound(_) | AppError::Gone(_)));
    if reserved && !failed {
        if let Some(conn) = conn.as_mut() {
            throttle::release_attempt(conn, ip).await;
        }
    }

    result
}

/// Cache first, then the database. Revoked shares never come back from the cache.
async fn resolve_share(
    state: &AppState,
    mut conn: Option<&mut Connection>,
    code: &str,
) -> AppResult<ShareCacheData> {
    let code_hash = hash_share_code(code);

    let cached = match conn.as_deref_mut() {
        Some(conn) => ShareCacheData::load_cached(conn, &code_hash).await,
        None => None,
    };

    let share = match cached {
        Some(share) => share,
        None => {
            let share = ShareRepository::find_by_code_hash(&state.db, &code_hash)
                .await?
                .ok_or_else(|| AppError::NotFound("Invalid share code".to_string()))?;
            if let Some(conn) = conn.as_deref_mut() {
                share.store_cached(conn).await;
            }
            share
        }
    };

    if share.is_expired(Utc::now()) {
        return Err(AppError::Gone("This share code has expired".to_string()));
    }

    Ok(share)
}

/// Receive page handler.
///
/// Lookup failures the visitor can act on are shown on the page instead of
/// as JSON.
///
/// # Route
///
/// `GET /s/{code}`
pub async fn receive_page_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
    ClientIp(ip): ClientIp,
) -> AppResult<Response> {
    let (status, template) = match lookup_share(&state, &code, &ip).await {
        Ok(share) => (StatusCode::OK, ReceiveTemplate::found(&code, &share, Utc::now())),
        Err(e) => {
            let (status, message) = page_error(e)?;
            (status, ReceiveTemplate::failed(&code, message))
        }
    };

    let html = template.render()?;
    Ok((status, Html(html)).into_response())
}

/// Splits visitor-facing lookup errors from server errors.
fn page_error(err: AppError) -> AppResult<(StatusCode, String)> {
    match err {
        AppError::BadRequest(msg) => Ok((StatusCode::BAD_REQUEST, msg)),
        AppError::NotFound(msg) => Ok((StatusCode::NOT_FOUND, msg)),
        AppError::Gone(msg) => Ok((StatusCode::GONE, msg)),
        AppError::TooManyRequests(msg) => Ok((StatusCode::TOO_MANY_REQUESTS, msg)),
        other => Err(other),
    }
}

/// A file received in the upload form.
struct Upload {
    name: String,
    content_type: String,
    data: Vec<u8>,
}

/// Turns uploads into stored files, sealing them when `encrypt` is set.
///
/// CPU bound; run it on the blocking pool.
fn seal_uploads(
    code: &str,
    salt: &[u8],
    iterations: u32,
    encrypt: bool,
    uploads: &[Upload],
) -> AppResult<Vec<NewSharedFile>> {
    let key = encrypt.then(|| derive_key(code, salt, iterations));

    uploads
        .iter()
        .map(|upload| {
            let data = match &key {
                Some(key) => seal(key, &upload.data)?,
                None => upload.data.clone(),
            };
            Ok(NewSharedFile {
                name: upload.name.clone(),
                content_type: upload.content_type.clone(),
                size: i64::try_from(upload.data.len()).unwrap_or(i64::MAX),
                checksum: checksum(&upload.data),
                data,
            })
        })
        .collect()
}

/// Opens stored payloads and checks them against their checksums.
///
/// Returns `(name, plaintext)` in the order given. CPU bound; run it on the
/// blocking pool.
fn open_payloads(
    code: &str,
    share: &ShareCacheData,
    payloads: Vec<(i32, Vec<u8>)>,
) -> AppResult<Vec<(String, Vec<u8>)>> {
    let key = if share.encrypted {
        let iterations = u32::try_from(share.kdf_iterations)
            .map_err(|_| AppError::Crypto("Invalid KDF iteration count".to_string()))?;
        Some(derive_key(code, &share.salt, iterations))
    } else {
        None
    };

    payloads
        .into_iter()
        .map(|(position, data)| {
            let meta = share
                .file(position)
                .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

            let plaintext = match &key {
                Some(key) => open(key, &data)?,
                None => data,
            };

            if checksum(&plaintext) != meta.checksum {
                return Err(AppError::Crypto(format!(
                    "Checksum mismatch for file {position} of share {}",
                    share.id
                )));
            }

            Ok((meta.name.clone(), plaintext))
        })
        .collect()
}

/// Share creation handler.
///
/// Accepts `files` parts plus option fields, seals every file with a key
/// derived from a fresh share code, and stores the share. A code that is
/// already taken by a live share is replaced with a new one.
///
/// # Route
///
/// `POST /v1/shares`
pub async fn create_share_handler(
    State(state): State<AppState>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<CreateShareResponse>)> {
    // 1. Read the form
    let mut options = CreateShareOptions::default();
    let mut uploads = Vec::new();
    let mut total_bytes: usize = 0;

    while let Some(mut field) = multipart.next_field().await? {
        let Some(field_name) = field.name().map(ToString::to_string) else {
            continue;
        };

        if field_name != "files" {
            let value = field.text().await?;
            options.apply_field(&field_name, &value)?;
            continue;
        }

        let raw_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field
            .content_type()
            .filter(|ct| !ct.is_empty() && ct.len() <= MAX_CONTENT_TYPE_LEN)
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let mut data = Vec::new();
        while let Some(chunk) = field.chunk().await? {
            total_bytes += chunk.len();
            if total_bytes > APP_CONFIG.max_upload_bytes {
                return Err(AppError::PayloadTooLarge(format!(
                    "Upload exceeds {} bytes",
                    APP_CONFIG.max_upload_bytes
                )));
            }
            data.extend_from_slice(&chunk);
        }

        // Browsers send an empty, nameless part when no file was picked
        if data.is_empty() && raw_name.trim().is_empty() {
            continue;
        }

        if uploads.len() >= APP_CONFIG.max_files_per_share {
            return Err(AppError::BadRequest(format!(
                "A share can hold at most {} files",
                APP_CONFIG.max_files_per_share
            )));
        }

        uploads.push(Upload {
            name: sanitize_file_name(&raw_name),
            content_type,
            data,
        });
    }

    if uploads.is_empty() {
        return Err(AppError::BadRequest("No files uploaded".to_string()));
    }

    // 2. Validation
    options.validate().map_err(|e| e.to_validation_error())?;
    let ttl_hours =
        options.ttl_hours(APP_CONFIG.share_ttl_hours, APP_CONFIG.max_share_ttl_hours)?;
    let encrypt = options.encrypt();
    let max_downloads = options.effective_max_downloads();
    let iterations = APP_CONFIG.kdf_iterations;
    let stored_iterations = i32::try_from(iterations)
        .map_err(|_| AppError::Internal("KDF iteration count out of range".to_string()))?;
    let expires_at = Utc::now() + Duration::hours(i64::from(ttl_hours));

    let uploads = Arc::new(uploads);
    let file_count = uploads.len();

    // 3. Seal and store, retrying on code collisions
    for _ in 0..CODE_GENERATION_ATTEMPTS {
        let code = gen_share_code();
        let salt = gen_salt();

        let files = {
            let code = code.clone();
            let uploads = Arc::clone(&uploads);
            tokio::task::spawn_blocking(move || {
                seal_uploads(&code, &salt, iterations, encrypt, &uploads)
            })
            .await
            .map_err(|e| AppError::Internal(format!("Encryption task failed: {e}")))??
        };

        let new_share = NewShare {
            code_hash: hash_share_code(&code),
            owner: claims.sub.clone(),
            salt: salt.to_vec(),
            encrypted: encrypt,
            kdf_iterations: stored_iterations,
            max_downloads,
            expires_at,
        };

        let Some(share) = ShareRepository::create(&state.db, &new_share, &files).await? else {
            tracing::debug!("Share code already taken, generating another");
            continue;
        };

        tracing::info!(
            share_id = share.id,
            files = file_count,
            bytes = total_bytes,
            encrypted = encrypt,
            "Share created"
        );

        let base_url = APP_CONFIG.public_base_url.as_str();
        let response = CreateShareResponse {
            message: "Share created successfully".to_string(),
            qr_code: render_data_uri(&share_qr_payload(&code, base_url))?,
            share_url: (!base_url.is_empty()).then(|| format!("{base_url}/s/{code}")),
            encrypted: share.encrypted,
            expires_at: share.expires_at,
            expires_in_secs: (share.expires_at - share.created_at).num_seconds(),
            max_downloads: share.max_downloads,
            files: uploads
                .iter()
                .zip(0..)
                .map(|(upload, position)| FileEntry {
                    position,
                    name: upload.name.clone(),
                    content_type: upload.content_type.clone(),
                    size: i64::try_from(upload.data.len()).unwrap_or(i64::MAX),
                    download_url: format!("/v1/shares/{code}/files/{position}"),
                })
                .collect(),
            code,
        };

        return Ok((StatusCode::CREATED, Json(response)));
    }

    Err(AppError::Internal(
        "Could not allocate a unique share code".to_string(),
    ))
}

/// Share manifest handler. Viewing the manifest does not count as a download.
///
/// # Route
///
/// `GET /v1/shares/{code}`
pub async fn manifest_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
    ClientIp(ip): ClientIp,
) -> AppResult<Json<ShareManifestResponse>> {
    let share = lookup_share(&state, &code, &ip).await?;

    let downloads_remaining = match share.max_downloads {
        Some(max) => {
            let download_count = ShareRepository::download_count(&state.db, share.id)
                .await?
                .ok_or_else(|| AppError::NotFound("Invalid share code".to_string()))?;
            DownloadGrant {
                download_count,
                max_downloads: Some(max),
            }
            .remaining()
        }
        None => None,
    };

    Ok(Json(ShareManifestResponse::new(
        &code,
        &share,
        downloads_remaining,
        Utc::now(),
    )))
}

/// QR code image handler.
///
/// # Route
///
/// `GET /v1/shares/{code}/qr.png`
pub async fn qr_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
    ClientIp(ip): ClientIp,
) -> AppResult<Response> {
    lookup_share(&state, &code, &ip).await?;

    let png = render_png(&share_qr_payload(&code, &APP_CONFIG.public_base_url))?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("image/png")),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        png,
    )
        .into_response())
}

/// Counts one download. Deletes the share once the last allowed download is used.
async fn finish_download(state: &AppState, share: &ShareCacheData) -> AppResult<DownloadGrant> {
    let grant = ShareRepository::register_download(&state.db, share.id)
        .await?
        .ok_or_else(|| AppError::Gone("This share is no longer available".to_string()))?;

    if grant.exhausted() {
        ShareRepository::delete(&state.db, share.id).await?;
        if let Some(mut conn) = cache_conn(state).await {
            ShareCacheData::retire(&mut conn, &share.code_hash).await;
        }
        tracing::info!(share_id = share.id, "Download limit reached, share deleted");
    }

    Ok(grant)
}

/// Builds an attachment `Content-Disposition` with an RFC 5987 UTF-8 name.
fn content_disposition(file_name: &str) -> HeaderValue {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(file_name, NON_ALPHANUMERIC);

    HeaderValue::from_str(&format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Builds a download response.
fn attachment(file_name: &str, content_type: &str, body: Vec<u8>) -> Response {
    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));

    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, content_disposition(file_name)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
            (
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ),
        ],
        body,
    )
        .into_response()
}

/// Single file download handler.
///
/// The payload is opened and verified before the download is counted, so a
/// corrupt file never uses up a one-time share.
///
/// # Route
///
/// `GET /v1/shares/{code}/files/{position}`
pub async fn download_file_handler(
    State(state): State<AppState>,
    Path((code, position)): Path<(String, i32)>,
    ClientIp(ip): ClientIp,
) -> AppResult<Response> {
    let share = lookup_share(&state, &code, &ip).await?;

    let meta = share
        .file(position)
        .cloned()
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    let data = ShareRepository::load_file_data(&state.db, share.id, position)
        .await?
        .ok_or_else(|| AppError::Gone("This share is no longer available".to_string()))?;

    let opened = {
        let share = share.clone();
        tokio::task::spawn_blocking(move || open_payloads(&code, &share, vec![(position, data)]))
            .await
            .map_err(|e| AppError::Internal(format!("Decryption task failed: {e}")))??
    };
    let (name, plaintext) = opened
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    let grant = finish_download(&state, &share).await?;
    tracing::info!(
        share_id = share.id,
        position,
        bytes = plaintext.len(),
        downloads = grant.download_count,
        remaining = ?grant.remaining(),
        "File downloaded"
    );

    Ok(attachment(&name, &meta.content_type, plaintext))
}

/// ZIP archive download handler.
///
/// `?files=0,2` selects files by position; without it every file is packed.
/// One archive counts as one download.
///
/// # Route
///
/// `GET /v1/shares/{code}/archive`
pub async fn archive_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<ArchiveQuery>,
    ClientIp(ip): ClientIp,
) -> AppResult<Response> {
    let share = lookup_share(&state, &code, &ip).await?;
    let selection = parse_positions(query.files.as_deref(), share.files.len())?;

    let mut stored: HashMap<i32, Vec<u8>> = ShareRepository::load_all_file_data(&state.db, share.id)
        .await?
        .into_iter()
        .collect();

    let (archive_name, order) = match selection {
        Some(positions) => ("selected_files.zip", positions),
        None => (
            "all_files.zip",
            share.files.iter().map(|f| f.position).collect(),
        ),
    };

    let payloads = order
        .into_iter()
        .map(|position| {
            stored
                .remove(&position)
                .map(|data| (position, data))
                .ok_or_else(|| AppError::Gone("This share is no longer available".to_string()))
        })
        .collect::<AppResult<Vec<_>>>()?;

    let zipped = {
        let share = share.clone();
        tokio::task::spawn_blocking(move || {
            let entries = open_payloads(&code, &share, payloads)?;
            build_zip(&entries)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Archive task failed: {e}")))??
    };

    let grant = finish_download(&state, &share).await?;
    tracing::info!(
        share_id = share.id,
        bytes = zipped.len(),
        downloads = grant.download_count,
        remaining = ?grant.remaining(),
        "Archive downloaded"
    );

    Ok(attachment(archive_name, "application/zip", zipped))
}

/// Share revocation handler.
///
/// Only the visitor who created the share may delete it. Anyone else gets the
/// same 404 as for an unknown code.
///
/// # Route
///
/// `DELETE /v1/shares/{code}`
pub async fn revoke_share_handler(
    State(state): State<AppState>,
    Extension(AuthUser(claims)): Extension<AuthUser>,
    Path(code): Path<String>,
) -> AppResult<StatusCode> {
    validate_share_code(&code)?;
    let code_hash = hash_share_code(&code);

    if !ShareRepository::delete_owned(&state.db, &code_hash, &claims.sub).await? {
        return Err(AppError::NotFound("Invalid share code".to_string()));
    }

    if let Some(mut conn) = cache_conn(&state).await {
        ShareCacheData::retire(&mut conn, &code_hash).await;
    }
    tracing::info!("Share revoked by owner");

    Ok(StatusCode::NO_CONTENT)
}

/// Health check response.
#[derive(serde::Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Liveness probe handler.
///
/// Returns OK if the server is running. Used for Kubernetes liveness probe.
///
/// # Route
///
/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check response.
#[derive(serde::Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub cache: &'static str,
}

/// Readiness probe handler.
///
/// Checks database and cache connectivity. Used for Kubernetes readiness probe.
///
/// # Route
///
/// `GET /ready`
pub async fn readiness_handler(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();
    let cache_ok = state.cache.get().await.is_ok();

    let response = ReadinessResponse {
        status: if db_ok && cache_ok { "ok" } else { "degraded" },
        database: if db_ok { "connected" } else { "disconnected" },
        cache: if cache_ok {
            "connected"
        } else {
            "disconnected"
        },
    };

    if db_ok && cache_ok {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SharedFileMeta;

    const CODE: &str = "042917";

    fn create_test_upload(name: &str, data: &[u8]) -> Upload {
        Upload {
            name: name.to_string(),
            content_type: "text/plain".to_string(),
            data: data.to_vec(),
        }
    }

    /// Seals uploads and wraps them in a manifest as the repository would return it.
    fn create_sealed_share(encrypt: bool, uploads: &[Upload]) -> (ShareCacheData, Vec<(i32, Vec<u8>)>) {
        let salt = gen_salt();
        let files = seal_uploads(CODE, &salt, 1000, encrypt, uploads).unwrap();
        let now = Utc::now();

        let share = ShareCacheData {
            id: 1,
            code_hash: hash_share_code(CODE),
            owner: "Visitor123456789".to_string(),
            salt: salt.to_vec(),
            encrypted: encrypt,
            kdf_iterations: 1000,
            max_downloads: None,
            created_at: now,
            expires_at: now + Duration::hours(24),
            files: files
                .iter()
                .zip(0..)
                .map(|(f, position)| SharedFileMeta {
                    position,
                    name: f.name.clone(),
                    content_type: f.content_type.clone(),
                    size: f.size,
                    checksum: f.checksum.clone(),
                })
                .collect(),
        };
        let payloads = files.into_iter().zip(0..).map(|(f, p)| (p, f.data)).collect();
        (share, payloads)
    }

    // ============ seal/open 흐름 테스트 ============

    #[test]
    fn test_seal_and_open_encrypted() {
        let uploads = [
            create_test_upload("a.txt", b"first file"),
            create_test_upload("b.txt", b"second file"),
        ];
        let (share, payloads) = create_sealed_share(true, &uploads);

        assert_ne!(payloads[0].1, b"first file");
        let opened = open_payloads(CODE, &share, payloads).unwrap();
        assert_eq!(opened[0], ("a.txt".to_string(), b"first file".to_vec()));
        assert_eq!(opened[1], ("b.txt".to_string(), b"second file".to_vec()));
    }

    #[test]
    fn test_seal_unencrypted_stores_raw() {
        let uploads = [create_test_upload("raw.txt", b"plain")];
        let (share, payloads) = create_sealed_share(false, &uploads);

        assert_eq!(payloads[0].1, b"plain");
        assert_eq!(share.files[0].size, 5);
        let opened = open_payloads(CODE, &share, payloads).unwrap();
        assert_eq!(opened[0].1, b"plain");
    }

    #[test]
    fn test_open_with_wrong_code_fails() {
        let uploads = [create_test_upload("a.txt", b"secret")];
        let (share, payloads) = create_sealed_share(true, &uploads);

        let result = open_payloads("999999", &share, payloads);
        assert!(matches!(result, Err(AppError::Crypto(_))));
    }

    #[test]
    fn test_open_detects_checksum_mismatch() {
        let uploads = [create_test_upload("a.txt", b"original")];
        let (mut share, payloads) = create_sealed_share(false, &uploads);
        share.files[0].checksum = checksum(b"something else");

        let result = open_payloads(CODE, &share, payloads);
        assert!(matches!(result, Err(AppError::Crypto(_))));
    }

    #[test]
    fn test_open_unknown_position() {
        let uploads = [create_test_upload("a.txt", b"x")];
        let (share, _) = create_sealed_share(false, &uploads);

        let result = open_payloads(CODE, &share, vec![(5, b"x".to_vec())]);
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    // ============ 헤더/포맷 테스트 ============

    #[test]
    fn test_content_disposition_ascii() {
        let value = content_disposition("report.pdf");
        assert_eq!(
            value.to_str().unwrap(),
            "attachment; filename=\"report.pdf\"; filename*=UTF-8''report%2Epdf"
        );
    }

    #[test]
    fn test_content_disposition_non_ascii_and_quotes() {
        let value = content_disposition("사진 \"1\".jpg");
        let text = value.to_str().unwrap();
        assert!(text.starts_with("attachment; filename=\"__ _1_.jpg\""));
        assert!(text.contains("filename*=UTF-8''%EC%82%AC%EC%A7%84"));
    }

    #[test]
    fn test_attachment_headers() {
        let response = attachment("a.txt", "text/plain", b"hi".to_vec());
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(headers[header::CACHE_CONTROL], "no-store");
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    }

    #[test]
    fn test_attachment_invalid_content_type_falls_back() {
        let response = attachment("a.bin", "bad\nvalue", Vec::new());
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            DEFAULT_CONTENT_TYPE
        );
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "0.50 KB");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(0), "0h 0m");
        assert_eq!(format_remaining(24 * 3600), "24h 0m");
        assert_eq!(format_remaining(3 * 3600 + 25 * 60 + 59), "3h 25m");
    }

    #[test]
    fn test_page_error_mapping() {
        let (status, msg) = page_error(AppError::Gone("expired".to_string())).unwrap();
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(msg, "expired");

        let (status, _) = page_error(AppError::NotFound("x".to_string())).unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);

        assert!(page_error(AppError::Internal("boom".to_string())).is_err());
    }

    // ============ 템플릿 테스트 ============

    #[test]
    fn test_index_html_has_upload_form() {
        assert!(INDEX_HTML.contains("<!DOCTYPE html>"));
        assert!(INDEX_HTML.contains("/v1/shares"));
    }

    #[test]
    fn test_index_html_tolerates_non_json_errors() {
        // 본문 크기 제한의 413 응답은 JSON이 아닐 수 있음
        assert!(!INDEX_HTML.contains("await response.json()"));
        assert!(INDEX_HTML.contains("readError(response)"));
        assert!(INDEX_HTML.contains("response.status === 413"));
    }

    #[test]
    fn test_receive_template_single_file_has_no_selection() {
        let uploads = [create_test_upload("only.txt", b"hello")];
        let (share, _) = create_sealed_share(true, &uploads);

        let html = ReceiveTemplate::found(CODE, &share, share.created_at)
            .render()
            .unwrap();
        assert!(html.contains("only.txt"));
        assert!(!html.contains("Download selected as ZIP"));
    }

    #[test]
    fn test_receive_template_lists_files() {
        let uploads = [
            create_test_upload("notes.txt", b"hello"),
            create_test_upload("<b>bold</b>.txt", b"x"),
        ];
        let (mut share, _) = create_sealed_share(true, &uploads);
        share.max_downloads = Some(1);

        let html = ReceiveTemplate::found(CODE, &share, share.created_at)
            .render()
            .unwrap();

        assert!(html.contains("notes.txt"));
        assert!(html.contains("/v1/shares/042917/files/0"));
        assert!(html.contains("/v1/shares/042917/archive"));
        assert!(html.contains("downloaded once"));
        assert!(html.contains("24h 0m"));
        // 선택 다운로드용 체크박스
        assert!(html.contains(r#"class="pick" value="0""#));
        assert!(html.contains(r#"class="pick" value="1""#));
        assert!(html.contains("Download selected as ZIP"));
        // File names are escaped
        assert!(!html.contains("<b>bold</b>"));
    }

    #[test]
    fn test_receive_template_error() {
        let html = ReceiveTemplate::failed(CODE, "This share code has expired".to_string())
            .render()
            .unwrap();
        assert!(html.contains("This share code has expired"));
        assert!(!html.contains("/archive"));
    }

    // ============ Health Check 핸들러 테스트 ============

    #[tokio::test]
    async fn test_health_handler_returns_ok() {
        let response = health_handler().await;
        assert_eq!(response.status, "ok");
        assert!(!response.version.is_empty());
    }

    #[test]
    fn test_readiness_response_degraded() {
        let response = ReadinessResponse {
            status: "degraded",
            database: "connected",
            cache: "disconnected",
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("degraded"));
        assert!(json.contains("disconnected"));
    }
}
