//! ZIP archive and file name helpers.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use zip::write::{SimpleFileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::error::AppResult;

/// Maximum stored file name length in bytes.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Name used when nothing usable is left after sanitizing.
pub const FALLBACK_FILE_NAME: &str = "file";

/// Reduces an uploaded file name to a safe, flat name.
///
/// Directory components (either slash style) and control characters are
/// dropped, and the result is capped at `MAX_FILE_NAME_LEN` bytes.
#[must_use]
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let trimmed = cleaned.trim();

    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return FALLBACK_FILE_NAME.to_string();
    }

    let mut end = trimmed.len().min(MAX_FILE_NAME_LEN);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

/// Returns `name`, or `name (n).ext` when `name` is already in `taken`.
fn unique_name(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    };

    (1..)
        .map(|n| format!("{stem} ({n}){ext}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Packs `(name, bytes)` entries into a deflate-compressed ZIP archive.
///
/// Entry order is preserved. Duplicate names get a ` (n)` suffix so no entry
/// shadows another when extracted.
pub fn build_zip(entries: &[(String, Vec<u8>)]) -> AppResult<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(entries.iter().any(|(_, data)| data.len() > u32::MAX as usize));

    let mut taken = HashSet::with_capacity(entries.len());
    for (name, data) in entries {
        let entry_name = unique_name(name, &taken);
        zip.start_file(entry_name.as_str(), options)?;
        zip.write_all(data)?;
        taken.insert(entry_name);
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn read_zip(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut file = archive.by_index(i).unwrap();
                let mut data = Vec::new();
                file.read_to_end(&mut data).unwrap();
                (file.name().to_string(), data)
            })
            .collect()
    }

    // ============ sanitize_file_name 테스트 ============

    #[test]
    fn test_sanitize_keeps_plain_names() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("사진 2024.jpg"), "사진 2024.jpg");
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\notes.txt"), "notes.txt");
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize_file_name("bad\r\nname\0.txt"), "badname.txt");
    }

    #[test]
    fn test_sanitize_fallback() {
        assert_eq!(sanitize_file_name(""), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("dir/"), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name(".."), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("   "), FALLBACK_FILE_NAME);
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let long = "가".repeat(200); // 600 bytes
        let name = sanitize_file_name(&long);
        assert!(name.len() <= MAX_FILE_NAME_LEN);
        assert!(name.chars().all(|c| c == '가'));
    }

    // ============ build_zip 테스트 ============

    #[test]
    fn test_build_zip_contents() {
        let entries = vec![
            ("a.txt".to_string(), b"alpha".to_vec()),
            ("b.bin".to_string(), vec![0u8; 4096]),
        ];

        let unpacked = read_zip(build_zip(&entries).unwrap());
        assert_eq!(unpacked, entries);
    }

    #[test]
    fn test_build_zip_compresses() {
        let entries = vec![("zeros.bin".to_string(), vec![0u8; 64 * 1024])];
        let zipped = build_zip(&entries).unwrap();
        assert!(zipped.len() < 64 * 1024 / 10);
    }

    #[test]
    fn test_build_zip_deduplicates_names() {
        let entries = vec![
            ("photo.jpg".to_string(), b"1".to_vec()),
            ("photo.jpg".to_string(), b"2".to_vec()),
            ("photo.jpg".to_string(), b"3".to_vec()),
            ("README".to_string(), b"4".to_vec()),
            ("README".to_string(), b"5".to_vec()),
        ];

        let names: Vec<String> = read_zip(build_zip(&entries).unwrap())
            .into_iter()
            .map(|(name, _)| name)
            .collect();

        assert_eq!(
            names,
            ["photo.jpg", "photo (1).jpg", "photo (2).jpg", "README", "README (1)"]
        );
    }

    #[test]
    fn test_build_zip_empty() {
        let zipped = build_zip(&[]).unwrap();
        assert!(read_zip(zipped).is_empty());
    }

    #[test]
    fn test_unique_name_dotfile() {
        let taken: HashSet<String> = [".env".to_string()].into_iter().collect();
        assert_eq!(unique_name(".env", &taken), ".env (1)");
    }
}
