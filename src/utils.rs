//! Utility functions for slugs, log formatting, model output cleanup, and file system checks.
//!
//! - Slug derivation and validation (the article store's primary key)
//! - String truncation for logging
//! - JSON error detection for handling truncated model responses
//! - Code-fence stripping for model output
//! - Stable short hashes for fallback image selection
//! - File system validation for output directories

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

static NON_ALNUM_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());
static VALID_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").unwrap());

/// Convert a title to the article slug.
///
/// Lowercases the text, collapses every run of characters outside
/// `[a-z0-9]` into a single hyphen, and trims hyphens from both ends.
/// Titles with nothing usable in them become `"untitled"`.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify("Breaking: G7 Summit Ends!"), "breaking-g7-summit-ends");
/// assert_eq!(slugify(""), "untitled");
/// ```
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let slug = NON_ALNUM_RUN.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.to_string()
    }
}

/// `true` when `slug` has the shape [`slugify`] produces. Anything else is
/// refused before it can be joined onto a file system path.
pub fn is_valid_slug(slug: &str) -> bool {
    VALID_SLUG.is_match(slug)
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut at `max` characters with an ellipsis and byte count
/// indicator appended.
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When the model response is cut off (e.g. by a token limit) the JSON fails
/// to parse with an EOF error; that case is worth asking again.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Remove Markdown code fences and any prose around the outermost JSON object.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```") {
        // Drop the info string (`json`, `JSON`, ...) on the opening fence line.
        // A one-line fence keeps it; the brace scan below skips past it.
        s = rest.split_once('\n').map_or(rest, |(_, body)| body);
        s = s.trim_end();
        s = s.strip_suffix("```").unwrap_or(s).trim();
    }
    match (s.find('{'), s.rfind('}')) {
        (Some(start), Some(end)) if start < end => &s[start..=end],
        // Unbalanced: hand the tail to the parser so it reports EOF.
        (Some(start), _) => &s[start..],
        _ => s,
    }
}

/// First `len` hex characters of the SHA-256 of `input`. Stable across runs and builds.
pub fn stable_hash(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(len);
    hex
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}
