//! Loading and normalization of URL manifests.
//!
//! A manifest is a plain text file with one candidate URL per line. Blank
//! lines and `#` comments are stripped, each remaining candidate is
//! normalized, and duplicates are detected on the normalized form in
//! first-seen order.

use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;
use url::form_urlencoded;
use url::Url;

/// Query keys dropped during normalization, matched by case-insensitive prefix.
const TRACKING_PREFIXES: [&str; 5] = ["utm_", "utm-", "ref", "gclid", "fbclid"];

#[derive(Debug, Error)]
#[error("failed to read manifest: {0}")]
pub struct ManifestLoadError(#[from] std::io::Error);

/// A validated manifest line ready for pipeline processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlEntry {
    pub raw_url: String,
    pub normalized_url: String,
    pub source_line: usize,
}

/// A manifest line that failed URL validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidUrlEntry {
    pub raw_url: String,
    pub reason: String,
    pub source_line: usize,
}

#[derive(Debug, Default)]
pub struct ManifestLoadResult {
    pub entries: Vec<UrlEntry>,
    pub invalid_entries: Vec<InvalidUrlEntry>,
    pub duplicate_urls: Vec<String>,
}

/// Normalize a URL into the canonical form used for deduplication.
///
/// Lower-cases the scheme and host, drops the fragment, collapses an empty
/// path to `/`, strips a trailing `/` (the root stays `/`), and re-encodes
/// the query with tracking keys and blank values removed. Idempotent for
/// every URL it accepts.
pub fn normalize_url(raw: &str) -> Result<String, String> {
    let mut url = Url::parse(raw.trim())
        .map_err(|_| "URL must include scheme and host".to_string())?;

    if url.host_str().is_none() {
        return Err("URL must include scheme and host".to_string());
    }

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("URL scheme '{}' is not supported", other)),
    }

    url.set_fragment(None);

    let path = url.path().trim_end_matches('/').to_string();
    if path.is_empty() {
        url.set_path("/");
    } else {
        url.set_path(&path);
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, value)| {
            let lowered = key.to_lowercase();
            !key.is_empty()
                && !value.is_empty()
                && !TRACKING_PREFIXES
                    .iter()
                    .any(|prefix| lowered.starts_with(prefix))
        })
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept)
            .finish();
        url.set_query(Some(&query));
    }

    Ok(url.to_string())
}

fn strip_inline_comment(line: &str) -> &str {
    match line.split_once('#') {
        Some((prefix, _)) => prefix.trim(),
        None => line.trim(),
    }
}

/// Parse manifest text into validated, deduplicated entries.
pub fn parse_manifest(text: &str) -> ManifestLoadResult {
    let mut result = ManifestLoadResult::default();
    let mut seen: HashSet<String> = HashSet::new();

    for (index, line) in text.lines().enumerate() {
        let candidate = strip_inline_comment(line);
        if candidate.is_empty() {
            continue;
        }
        let source_line = index + 1;

        let normalized = match normalize_url(candidate) {
            Ok(normalized) => normalized,
            Err(reason) => {
                result.invalid_entries.push(InvalidUrlEntry {
                    raw_url: candidate.to_string(),
                    reason,
                    source_line,
                });
                continue;
            }
        };

        if !seen.insert(normalized.clone()) {
            result.duplicate_urls.push(normalized);
            continue;
        }

        result.entries.push(UrlEntry {
            raw_url: candidate.to_string(),
            normalized_url: normalized,
            source_line,
        });
    }

    result
}

/// Load and validate URLs from a manifest file on disk.
pub fn load_manifest(path: impl AsRef<Path>) -> Result<ManifestLoadResult, ManifestLoadError> {
    let contents = fs::read_to_string(path.as_ref())?;
    Ok(parse_manifest(&contents))
}
