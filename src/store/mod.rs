//! Article Store: slug-keyed records plus the derived listing index.
//!
//! Two tiers:
//!
//! - **cache** (in-process, write-through): authoritative for this process's
//!   own reads after a write, including writes whose durable half failed
//! - **records directory** (`{slug}.json`, durable): authoritative across
//!   processes, and the only input the index is ever derived from
//!
//! A successful record write is always followed by a full index rebuild, so
//! the index never names a slug whose record is not on disk.

pub mod index;

use crate::error::StoreError;
use crate::models::{Article, ArticleStatus, Category, IndexEntry, IndexSnapshot, Page};
use crate::utils::{is_valid_slug, slugify};
use chrono::{Duration, Utc};
use rand::{Rng, rng};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// Result of [`ArticleStore::save`].
#[derive(Debug, Clone)]
pub struct PersistedArticle {
    pub article: Article,
    /// `false` when only the cache holds this version.
    pub durable: bool,
}

#[derive(Debug)]
pub struct ArticleStore {
    records_dir: PathBuf,
    index_path: PathBuf,
    max_index_entries: usize,
    cache: RwLock<HashMap<String, Article>>,
}

impl ArticleStore {
    pub fn new(records_dir: impl Into<PathBuf>, index_path: impl Into<PathBuf>, max_index_entries: usize) -> Self {
        Self {
            records_dir: records_dir.into(),
            index_path: index_path.into(),
            max_index_entries,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(&config.records_dir, &config.index_path, config.max_index_entries)
    }

    fn record_path(&self, slug: &str) -> PathBuf {
        self.records_dir.join(format!("{slug}.json"))
    }

    fn cache_read(&self) -> RwLockReadGuard<'_, HashMap<String, Article>> {
        self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cache_write(&self) -> RwLockWriteGuard<'_, HashMap<String, Article>> {
        self.cache.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Upsert `article` under its slug.
    ///
    /// Derives the slug from the title when empty, stamps `category` and a
    /// fresh `saved_at`, and updates the cache before attempting the durable
    /// write. A failed durable write is logged and reported through
    /// [`PersistedArticle::durable`] rather than as an error.
    #[instrument(level = "info", skip_all, fields(slug = %article.slug, category = %category))]
    pub async fn save(&self, mut article: Article, category: Category) -> Result<PersistedArticle, StoreError> {
        if article.slug.is_empty() {
            article.slug = slugify(&article.title);
        }
        if !is_valid_slug(&article.slug) {
            return Err(StoreError::InvalidSlug(article.slug));
        }
        article.category = category;

        let mut now = Utc::now();
        {
            let mut cache = self.cache_write();
            // saved_at only ever moves forward for a given slug within this process.
            if let Some(prev) = cache.get(&article.slug).and_then(|a| a.saved_at) {
                if prev >= now {
                    now = prev + Duration::milliseconds(1);
                }
            }
            article.saved_at = Some(now);
            cache.insert(article.slug.clone(), article.clone());
        }

        let json = serde_json::to_vec_pretty(&article)?;
        let path = self.record_path(&article.slug);
        if let Err(e) = write_atomic(&path, &json).await {
            warn!(
                slug = %article.slug,
                path = %path.display(),
                error = %e,
                "Durable write failed; article kept in memory only"
            );
            return Ok(PersistedArticle { article, durable: false });
        }
        info!(slug = %article.slug, path = %path.display(), "Saved article");

        if let Err(e) = self.rebuild_index().await {
            warn!(slug = %article.slug, error = %e, "Index rebuild after save failed");
        }
        Ok(PersistedArticle { article, durable: true })
    }

    /// Cache first, then the record file. Missing, invalid or corrupt yields `None`.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_by_slug(&self, slug: &str) -> Option<Article> {
        if !is_valid_slug(slug) {
            debug!("Rejected invalid slug");
            return None;
        }
        if let Some(article) = self.cache_read().get(slug) {
            return Some(article.clone());
        }

        let path = self.record_path(slug);
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Unreadable record");
                }
                return None;
            }
        };
        match serde_json::from_slice::<Article>(&bytes) {
            Ok(mut article) => {
                article.slug = slug.to_string();
                self.cache_write().insert(slug.to_string(), article.clone());
                Some(article)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt record");
                None
            }
        }
    }

    /// The dedupe barrier: known to this process's cache or present on disk.
    pub async fn exists(&self, slug: &str) -> bool {
        if !is_valid_slug(slug) {
            return false;
        }
        if self.cache_read().contains_key(slug) {
            return true;
        }
        fs::try_exists(self.record_path(slug)).await.unwrap_or(false)
    }

    /// Remove a record and its cache entry, then rebuild the index.
    /// Returns whether anything was removed.
    #[instrument(level = "info", skip(self))]
    pub async fn delete(&self, slug: &str) -> Result<bool, StoreError> {
        if !is_valid_slug(slug) {
            return Err(StoreError::InvalidSlug(slug.to_string()));
        }
        let cached = self.cache_write().remove(slug).is_some();
        let on_disk = match fs::remove_file(self.record_path(slug)).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if on_disk {
            self.rebuild_index().await?;
        }
        info!(cached, on_disk, "Deleted article");
        Ok(cached || on_disk)
    }

    pub async fn rebuild_index(&self) -> Result<IndexSnapshot, StoreError> {
        index::rebuild_index(&self.records_dir, &self.index_path, self.max_index_entries).await
    }

    pub async fn read_index(&self) -> IndexSnapshot {
        index::read_index(&self.records_dir, &self.index_path, self.max_index_entries).await
    }

    /// One 1-indexed page of the index, newest first, optionally limited to
    /// one category (case-insensitive). Page 0 is treated as page 1.
    #[instrument(level = "debug", skip(self))]
    pub async fn list_page(&self, page: usize, page_size: usize, category: Option<&str>) -> Page {
        let mut entries: Vec<IndexEntry> = self
            .read_index()
            .await
            .articles
            .into_iter()
            .filter(|e| category.is_none_or(|c| e.category.as_str().eq_ignore_ascii_case(c.trim())))
            .collect();
        entries.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));

        let total = entries.len();
        let start = page.max(1).saturating_sub(1).saturating_mul(page_size);
        let items = entries.into_iter().skip(start).take(page_size).collect();
        Page { items, total }
    }

    /// Every scheduled entry, due or not.
    pub async fn get_scheduled_articles(&self) -> Vec<IndexEntry> {
        self.read_index()
            .await
            .articles
            .into_iter()
            .filter(|e| e.status == ArticleStatus::Scheduled)
            .collect()
    }
}

/// Write to a unique sibling temp file, then rename over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("record");
    let tmp = path.with_file_name(format!(
        ".{file_name}.{}.{:08x}.tmp",
        std::process::id(),
        rng().random::<u32>()
    ));

    if let Err(e) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn store_in(tmp: &TempDir) -> ArticleStore {
        ArticleStore::new(tmp.path().join("articles"), tmp.path().join("index.json"), 100)
    }

    fn dated(title: &str, day: u32) -> Article {
        let mut article = Article::new(title, Category::World);
        article.pub_date = Some(Utc.with_ymd_and_hms(2026, 10, day, 8, 0, 0).unwrap());
        article
    }

    async fn record_files(dir: &Path) -> Vec<String> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(dir).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        names
    }

    #[tokio::test]
    async fn save_stamps_slug_category_and_saved_at() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);

        let saved = store
            .save(Article::new("Breaking: G7 Summit Ends!", Category::World), Category::Politics)
            .await
            .unwrap();
        assert!(saved.durable);
        assert_eq!(saved.article.slug, "breaking-g7-summit-ends");
        assert_eq!(saved.article.category, Category::Politics);
        assert!(saved.article.saved_at.is_some());

        assert!(tmp.path().join("articles/breaking-g7-summit-ends.json").exists());
        let index = store.read_index().await;
        assert_eq!(index.articles.len(), 1);
        assert_eq!(index.articles[0].category, Category::Politics);
    }

    #[tokio::test]
    async fn saving_same_slug_twice_upserts() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);

        let first = store.save(dated("Same Story", 1), Category::World).await.unwrap();
        let mut edited = dated("Same Story", 1);
        edited.content = "updated".to_string();
        let second = store.save(edited, Category::World).await.unwrap();

        assert!(second.article.saved_at > first.article.saved_at);
        assert_eq!(record_files(&tmp.path().join("articles")).await, vec!["same-story.json"]);

        let fresh = store_in(&tmp);
        let loaded = fresh.get_by_slug("same-story").await.unwrap();
        assert_eq!(loaded.content, "updated");
        assert_eq!(loaded.saved_at, second.article.saved_at);
        assert_eq!(fresh.read_index().await.articles.len(), 1);
    }

    #[tokio::test]
    async fn unwritable_directory_falls_back_to_memory() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"a file, not a directory").unwrap();
        let store = ArticleStore::new(blocker.join("articles"), tmp.path().join("index.json"), 100);

        let saved = store.save(dated("Ephemeral", 2), Category::Health).await.unwrap();
        assert!(!saved.durable);

        let cached = store.get_by_slug("ephemeral").await.unwrap();
        assert_eq!(cached.category, Category::Health);
        assert!(store.exists("ephemeral").await);
        assert!(store.read_index().await.articles.is_empty());
    }

    #[tokio::test]
    async fn get_by_slug_rejects_invalid_and_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);
        assert!(store.get_by_slug("../index").await.is_none());
        assert!(store.get_by_slug("no-such-story").await.is_none());
        assert!(!store.exists("no-such-story").await);

        let mut bad = Article::new("x", Category::World);
        bad.slug = "Not A Slug".to_string();
        assert!(matches!(
            store.save(bad, Category::World).await,
            Err(StoreError::InvalidSlug(_))
        ));
    }

    #[tokio::test]
    async fn list_page_slices_and_filters() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);
        for day in 1..=5 {
            let category = if day % 2 == 0 { Category::Sports } else { Category::World };
            store.save(dated(&format!("Story {day}"), day), category).await.unwrap();
        }

        let first = store.list_page(1, 2, None).await;
        assert_eq!(first.total, 5);
        let slugs: Vec<_> = first.items.iter().map(|e| e.slug.as_str()).collect();
        assert_eq!(slugs, vec!["story-5", "story-4"]);

        let last = store.list_page(3, 2, None).await;
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].slug, "story-1");

        assert!(store.list_page(4, 2, None).await.items.is_empty());

        let sports = store.list_page(1, 10, Some("SPORTS")).await;
        assert_eq!(sports.total, 2);
        assert!(sports.items.iter().all(|e| e.category == Category::Sports));
    }

    #[tokio::test]
    async fn scheduled_entries_are_listed_regardless_of_time() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);

        let mut later = dated("Later Story", 3);
        later.schedule(Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap());
        store.save(later, Category::Business).await.unwrap();
        store.save(dated("Now Story", 3), Category::Business).await.unwrap();

        let scheduled = store.get_scheduled_articles().await;
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].slug, "later-story");
        assert!(scheduled[0].scheduled_for.is_some());
    }

    #[tokio::test]
    async fn delete_removes_file_cache_and_index_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);
        store.save(dated("Doomed", 1), Category::World).await.unwrap();
        store.save(dated("Survivor", 2), Category::World).await.unwrap();

        assert!(store.delete("doomed").await.unwrap());
        assert!(!store.exists("doomed").await);
        let index = store.read_index().await;
        assert_eq!(index.articles.len(), 1);
        assert_eq!(index.articles[0].slug, "survivor");

        assert!(!store.delete("doomed").await.unwrap());
    }

    #[tokio::test]
    async fn write_atomic_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("nested/out.json");
        write_atomic(&target, b"{}").await.unwrap();
        write_atomic(&target, b"{\"v\":2}").await.unwrap();

        assert_eq!(record_files(&tmp.path().join("nested")).await, vec!["out.json"]);
        assert_eq!(fs::read(&target).await.unwrap(), b"{\"v\":2}");
    }
}
