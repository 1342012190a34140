//! The listing index: a bounded, derived projection of the record directory.
//!
//! The index file is never edited in place. It is always regenerated from a
//! full scan of the record files, so whatever is on disk at rebuild time is
//! exactly what the index describes. Concurrent rebuilds race, and the last
//! rename wins with a self-consistent snapshot.

use super::write_atomic;
use crate::error::StoreError;
use crate::models::{Article, IndexSnapshot};
use crate::utils::is_valid_slug;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// Parse every `{slug}.json` record under `records_dir`.
///
/// Unparseable files are logged and skipped. A missing directory is an empty
/// store. The file stem is the authoritative slug.
#[instrument(level = "debug", skip_all, fields(dir = %records_dir.display()))]
pub async fn scan_records(records_dir: &Path) -> Result<Vec<Article>, StoreError> {
    let mut entries = match fs::read_dir(records_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut articles = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(slug) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !is_valid_slug(slug) {
            debug!(path = %path.display(), "Skipping file with non-slug name");
            continue;
        }

        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable record; skipping");
                continue;
            }
        };
        match serde_json::from_slice::<Article>(&bytes) {
            Ok(mut article) => {
                article.slug = slug.to_string();
                articles.push(article);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Corrupt record; skipping"),
        }
    }
    Ok(articles)
}

/// Project, sort newest first, and keep at most `cap` entries.
///
/// Ties on the sort key fall back to slug order so the result does not depend
/// on directory iteration order.
pub fn project(articles: &[Article], cap: usize) -> IndexSnapshot {
    let mut ordered: Vec<&Article> = articles.iter().collect();
    ordered.sort_by(|a, b| {
        b.sort_key()
            .cmp(&a.sort_key())
            .then_with(|| a.slug.cmp(&b.slug))
    });
    let entries = ordered
        .into_iter()
        .take(cap)
        .map(Article::index_entry)
        .collect();
    IndexSnapshot { articles: entries }
}

/// Full scan, project, and atomic overwrite of the index file.
#[instrument(level = "info", skip_all, fields(index = %index_path.display()))]
pub async fn rebuild_index(
    records_dir: &Path,
    index_path: &Path,
    cap: usize,
) -> Result<IndexSnapshot, StoreError> {
    let articles = scan_records(records_dir).await?;
    let snapshot = project(&articles, cap);
    let json = serde_json::to_vec_pretty(&snapshot)?;
    write_atomic(index_path, &json).await?;
    info!(
        records = articles.len(),
        indexed = snapshot.articles.len(),
        "Rebuilt index"
    );
    Ok(snapshot)
}

/// Read the index file, regenerating it when it is missing or corrupt.
///
/// If the regenerated index cannot be written back, the in-memory snapshot is
/// still returned.
#[instrument(level = "debug", skip_all, fields(index = %index_path.display()))]
pub async fn read_index(records_dir: &Path, index_path: &Path, cap: usize) -> IndexSnapshot {
    match fs::read(index_path).await {
        Ok(bytes) => match serde_json::from_slice::<IndexSnapshot>(&bytes) {
            Ok(snapshot) => return snapshot,
            Err(e) => warn!(error = %e, "Corrupt index; rebuilding"),
        },
        Err(e) if e.kind() == ErrorKind::NotFound => debug!("No index yet; building"),
        Err(e) => warn!(error = %e, "Unreadable index; rebuilding"),
    }

    match rebuild_index(records_dir, index_path, cap).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "Could not persist rebuilt index; serving it from memory");
            match scan_records(records_dir).await {
                Ok(articles) => project(&articles, cap),
                Err(_) => IndexSnapshot::default(),
            }
        }
    }
}
