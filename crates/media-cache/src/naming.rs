//! File naming, cache keys and size formatting

use crate::types::AssetDescriptor;
use sha2::{Digest, Sha256};

const MAX_FILE_NAME_LEN: usize = 200;
const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const FALLBACK_NAME: &str = "file";

/// Make a display name safe to use as a single path component
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c.is_control() || FORBIDDEN_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced
        .trim()
        .trim_matches('.')
        .trim();

    if trimmed.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    truncate_keeping_extension(trimmed, MAX_FILE_NAME_LEN)
}

fn truncate_keeping_extension(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }

    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.chars().count() < max / 2 => {
            let keep = max - ext.chars().count() - 1;
            let stem: String = stem.chars().take(keep).collect();
            format!("{}.{}", stem, ext)
        }
        _ => name.chars().take(max).collect(),
    }
}

/// Pick the export name for an asset.
///
/// Explicit names win, then the last URL path segment when it carries an
/// extension, then `{id}.{ext}` with the extension implied by the asset kind.
pub fn derive_file_name(desc: &AssetDescriptor) -> String {
    if let Some(name) = desc.file_name.as_deref().map(str::trim) {
        if !name.is_empty() {
            return sanitize_file_name(name);
        }
    }

    if let Some(segment) = last_url_segment(&desc.url) {
        if has_extension(&segment) {
            return sanitize_file_name(&segment);
        }
    }

    sanitize_file_name(&format!("{}.{}", desc.id, desc.kind.default_extension()))
}

/// Lowercase extension of the URL's last path segment, if it looks like one
pub fn url_extension(url: &str) -> Option<String> {
    let segment = last_url_segment(url)?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn last_url_segment(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let segment = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()?;
    let decoded = urlencoding::decode(segment).ok()?;
    Some(decoded.into_owned())
}

fn has_extension(name: &str) -> bool {
    matches!(name.rsplit_once('.'), Some((stem, ext)) if !stem.is_empty() && !ext.is_empty())
}

/// Generate the on-disk key for an asset id
pub fn cache_key(asset_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(asset_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Human readable size in binary units, e.g. `4.82 GB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}
