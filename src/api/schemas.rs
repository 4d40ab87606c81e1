//! 요청/응답 스키마 모듈.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::{ShareCacheData, SharedFileMeta};

/// Upper bound for `max_downloads`.
pub const MAX_DOWNLOADS_LIMIT: u32 = 1000;

/// Hard ceiling for `expires_in_hours`; the configured maximum applies on top.
pub const TTL_HOURS_CEILING: u32 = 24 * 365;

/// Share options sent as multipart text fields next to the files.
///
/// Uses validator for the static range rules; the configured TTL bound is
/// checked by [`CreateShareOptions::ttl_hours`].
#[derive(Debug, Clone, Default, Validate)]
pub struct CreateShareOptions {
    /// Seal payloads with a key derived from the code (default true)
    pub encrypt: Option<bool>,

    /// Share lifetime in hours
    #[validate(range(
        min = 1,
        max = TTL_HOURS_CEILING,
        message = "expires_in_hours must be between 1 and 8760"
    ))]
    pub expires_in_hours: Option<u32>,

    /// Maximum number of downloads before the share is deleted
    #[validate(range(
        min = 1,
        max = MAX_DOWNLOADS_LIMIT,
        message = "max_downloads must be between 1 and 1000"
    ))]
    pub max_downloads: Option<u32>,

    /// Shorthand for `max_downloads = 1`
    pub one_time: Option<bool>,
}

impl CreateShareOptions {
    /// Stores one multipart text field. Unknown fields are ignored.
    pub fn apply_field(&mut self, name: &str, value: &str) -> AppResult<()> {
        let value = value.trim();
        match name {
            "encrypt" => self.encrypt = Some(parse_flag(name, value)?),
            "one_time" => self.one_time = Some(parse_flag(name, value)?),
            "expires_in_hours" => self.expires_in_hours = parse_number(name, value)?,
            "max_downloads" => self.max_downloads = parse_number(name, value)?,
            _ => {}
        }
        Ok(())
    }

    #[must_use]
    pub fn encrypt(&self) -> bool {
        self.encrypt.unwrap_or(true)
    }

    /// Resolves the lifetime, rejecting values above `max_hours`.
    pub fn ttl_hours(&self, default_hours: u32, max_hours: u32) -> AppResult<u32> {
        let hours = self.expires_in_hours.unwrap_or(default_hours);
        if hours == 0 || hours > max_hours {
            return Err(AppError::Validation(format!(
                "expires_in_hours must be between 1 and {max_hours}"
            )));
        }
        Ok(hours)
    }

    /// Download limit to store; `one_time` wins over `max_downloads`.
    #[must_use]
    pub fn effective_max_downloads(&self) -> Option<i32> {
        if self.one_time.unwrap_or(false) {
            return Some(1);
        }
        self.max_downloads
            .map(|max| i32::try_from(max.min(MAX_DOWNLOADS_LIMIT)).unwrap_or(1))
    }
}

/// Parses an HTML form style boolean.
fn parse_flag(name: &str, value: &str) -> AppResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" | "" => Ok(false),
        _ => Err(AppError::BadRequest(format!("{name} must be a boolean"))),
    }
}

/// Parses an optional unsigned number. An empty field means unset.
fn parse_number(name: &str, value: &str) -> AppResult<Option<u32>> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| AppError::BadRequest(format!("{name} must be a positive number")))
}

/// One file as listed to receivers.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub position: i32,
    pub name: String,
    pub content_type: String,
    pub size: i64,
    pub download_url: String,
}

impl FileEntry {
    #[must_use]
    pub fn from_meta(code: &str, meta: &SharedFileMeta) -> Self {
        Self {
            position: meta.position,
            name: meta.name.clone(),
            content_type: meta.content_type.clone(),
            size: meta.size,
            download_url: format!("/v1/shares/{code}/files/{}", meta.position),
        }
    }
}

/// Response for share creation.
#[derive(Debug, Serialize)]
pub struct CreateShareResponse {
    pub message: String,
    pub code: String,
    pub encrypted: bool,
    pub expires_at: DateTime<Utc>,
    pub expires_in_secs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_downloads: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_url: Option<String>,
    /// QR code as a `data:image/png;base64,...` URI
    pub qr_code: String,
    pub files: Vec<FileEntry>,
}

/// Manifest returned to receivers.
#[derive(Debug, Serialize)]
pub struct ShareManifestResponse {
    pub code: String,
    pub encrypted: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub expires_in_secs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads_remaining: Option<i32>,
    pub total_size: i64,
    pub files: Vec<FileEntry>,
}

impl ShareManifestResponse {
    #[must_use]
    pub fn new(
        code: &str,
        share: &ShareCacheData,
        downloads_remaining: Option<i32>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            code: code.to_string(),
            encrypted: share.encrypted,
            created_at: share.created_at,
            expires_at: share.expires_at,
            expires_in_secs: share.remaining_secs(now),
            downloads_remaining,
            total_size: share.total_size(),
            files: share
                .files
                .iter()
                .map(|meta| FileEntry::from_meta(code, meta))
                .collect(),
        }
    }
}

/// Query string of the archive download.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArchiveQuery {
    /// Comma-separated file positions, e.g. `0,2`
    #[serde(default)]
    pub files: Option<String>,
}

/// Parses an archive selection.
///
/// Returns `None` when nothing is selected, meaning every file. Positions keep
/// the order given; non-numbers, duplicates and positions outside
/// `0..file_count` are rejected.
pub fn parse_positions(raw: Option<&str>, file_count: usize) -> AppResult<Option<Vec<i32>>> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };

    let mut seen = HashSet::new();
    let mut positions = Vec::new();

    for part in raw.split(',') {
        let position: usize = part
            .trim()
            .parse()
            .map_err(|_| AppError::BadRequest(format!("Invalid file position: {part:?}")))?;

        if position >= file_count {
            return Err(AppError::BadRequest(format!(
                "File position {position} is out of range"
            )));
        }
        if !seen.insert(position) {
            return Err(AppError::BadRequest(format!(
                "File position {position} is selected twice"
            )));
        }

        positions.push(i32::try_from(position).map_err(|_| {
            AppError::BadRequest(format!("File position {position} is out of range"))
        })?);
    }

    Ok(Some(positions))
}
