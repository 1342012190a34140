//! Pipeline Orchestrator: batch seeding, single-article self-heal, the
//! scheduled-publish sweep, and the two admin edits.
//!
//! Items are processed strictly one after another. A failing item is logged
//! and counted; only configuration errors (no model credentials) end a run.
//!
//! # Generation failure policy
//!
//! - batch seed: the item is skipped and picked up again on the next run,
//!   since its slug was never written
//! - self-heal: a stub is saved from the source title and snippet so the
//!   page still has something to show, unless the existing record already
//!   has body text, in which case that text is kept

use crate::api::{AskAsync, ContentGenerator, GeminiClient, Urgency};
use crate::config::Config;
use crate::error::{PipelineError, StoreError};
use crate::feeds::FeedReader;
use crate::media::{MediaKind, MediaResolver, is_local_media};
use crate::models::{Article, ArticleStatus, Category, FeedItem, GeneratedArticle, SourceMaterial};
use crate::store::{ArticleStore, PersistedArticle};
use crate::utils::slugify;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, instrument, warn};

/// Outcome counters of one [`Pipeline::seed`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub created: usize,
    pub skipped_existing: usize,
    pub failed: usize,
    pub feeds_failed: usize,
    pub timed_out: bool,
}

pub struct Pipeline<M = GeminiClient> {
    config: Config,
    feeds: FeedReader,
    media: MediaResolver,
    generator: ContentGenerator<M>,
    store: ArticleStore,
}

impl Pipeline<GeminiClient> {
    pub fn from_config(config: Config) -> Result<Self, PipelineError> {
        let generator = ContentGenerator::from_config(&config.model, config.retry.clone())?;
        info!(
            model = %config.model.name,
            credentials = generator.credentials(),
            "Content generator ready"
        );
        Self::new(config, generator)
    }
}

impl<M: AskAsync> Pipeline<M> {
    pub fn new(config: Config, generator: ContentGenerator<M>) -> Result<Self, PipelineError> {
        let feeds = FeedReader::new(config.http_timeout())?;
        let media = MediaResolver::new(&config)?;
        let store = ArticleStore::from_config(&config);
        Ok(Self {
            config,
            feeds,
            media,
            generator,
            store,
        })
    }

    pub fn store(&self) -> &ArticleStore {
        &self.store
    }

    /// Ingest every configured feed, skipping slugs that already exist.
    ///
    /// Runs under the configured wall-clock ceiling; once it passes, the item
    /// in flight is abandoned and the report comes back with `timed_out` set.
    #[instrument(level = "info", skip_all, fields(feeds = self.config.feeds.len()))]
    pub async fn seed(&self) -> Result<SeedReport, PipelineError> {
        let t0 = Instant::now();
        let deadline = t0 + self.config.batch_ceiling();
        let mut report = SeedReport::default();

        'feeds: for source in &self.config.feeds {
            if Instant::now() >= deadline {
                report.timed_out = true;
                break;
            }
            let feed = match timeout_at(deadline, self.feeds.fetch_feed(&source.url)).await {
                Err(_) => {
                    report.timed_out = true;
                    break;
                }
                Ok(None) => {
                    report.feeds_failed += 1;
                    continue;
                }
                Ok(Some(feed)) => feed,
            };

            for item in feed.items.iter().take(self.config.max_items_per_feed) {
                let slug = slugify(&item.title);
                if self.store.exists(&slug).await {
                    debug!(%slug, "Already stored; skipping");
                    report.skipped_existing += 1;
                    continue;
                }

                match timeout_at(deadline, self.ingest_item(item, &slug, source.category)).await {
                    Err(_) => {
                        warn!(%slug, "Batch ceiling reached mid-item; stopping");
                        report.timed_out = true;
                        break 'feeds;
                    }
                    Ok(Ok(_)) => report.created += 1,
                    Ok(Err(e)) if e.is_fatal() => {
                        error!(%slug, error = %e, "Aborting seed run");
                        return Err(e);
                    }
                    Ok(Err(e)) => {
                        warn!(%slug, error = %e, "Skipping item");
                        report.failed += 1;
                    }
                }
            }
        }

        if let Err(e) = self.store.rebuild_index().await {
            warn!(error = %e, "Final index rebuild failed");
        }
        info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            created = report.created,
            skipped = report.skipped_existing,
            failed = report.failed,
            feeds_failed = report.feeds_failed,
            timed_out = report.timed_out,
            "Seed run finished"
        );
        Ok(report)
    }

    /// resolve → scrape → download → generate → save, for one new item.
    #[instrument(level = "info", skip(self, item), fields(title = %item.title))]
    async fn ingest_item(
        &self,
        item: &FeedItem,
        slug: &str,
        category: Category,
    ) -> Result<PersistedArticle, PipelineError> {
        let link = self.media.resolve_publisher_url(&item.link).await;
        let candidate = match &item.enclosure {
            Some(url) => Some(url.clone()),
            None => self.media.extract_image(&link).await,
        };
        let image = self
            .media
            .download_or_fallback(candidate.as_deref(), slug, category)
            .await;

        let mut source = SourceMaterial::from_feed_item(item, category);
        source.link = link.clone();
        let generated = self.generator.generate(&source, Urgency::Batch).await?;

        let mut article = Article::new(generated.title.clone(), category);
        article.slug = slug.to_string();
        apply_generated(&mut article, generated);
        article.image = Some(image);
        article.pub_date = Some(item.pub_date.unwrap_or_else(Utc::now));
        article.source = item.creator.clone();
        article.original_source = Some(link);

        Ok(self.store.save(article, category).await?)
    }

    /// Regenerate one article, from its feed item when still listed or from
    /// its own stored fields otherwise.
    ///
    /// Pinned images, publication state and the original publish date of an
    /// existing record survive. Already-local media is never re-downloaded,
    /// so repeated passes leave `image` and `video_url` unchanged. A category
    /// placeholder or a dead remote image is replaced from the feed enclosure
    /// or the publisher page when either yields a picture.
    #[instrument(level = "info", skip(self, existing))]
    pub async fn self_heal(
        &self,
        slug: &str,
        existing: Option<Article>,
    ) -> Result<PersistedArticle, PipelineError> {
        let existing = match existing {
            Some(article) => Some(article),
            None => self.store.get_by_slug(slug).await,
        };
        let found = self.find_feed_item(slug).await;

        let (category, mut source, feed_image) = match (&found, &existing) {
            (Some((category, item)), _) => {
                let link = self.media.resolve_publisher_url(&item.link).await;
                let mut source = SourceMaterial::from_feed_item(item, *category);
                source.link = link;
                (*category, source, item.enclosure.clone())
            }
            (None, Some(article)) => {
                info!("Feed item gone; healing from stored fields");
                (article.category, SourceMaterial::from_article(article), None)
            }
            (None, None) => return Err(PipelineError::NotFound(slug.to_string())),
        };
        if source.publisher.is_none() {
            source.publisher = existing.as_ref().and_then(|a| a.source.clone());
        }

        let image = self
            .heal_image(slug, category, existing.as_ref(), feed_image, &source.link)
            .await;
        let video_url = match existing.as_ref().and_then(|a| a.video_url.clone()) {
            Some(url) => Some(
                self.media
                    .download_media(&url, slug, MediaKind::Video)
                    .await
                    .unwrap_or(url),
            ),
            None => None,
        };

        let mut article = existing.clone().unwrap_or_else(|| Article::new(source.title.clone(), category));
        article.slug = slug.to_string();
        match self.generator.generate(&source, Urgency::Interactive).await {
            Ok(generated) => apply_generated(&mut article, generated),
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) if article.content.trim().is_empty() => {
                warn!(error = %e, "Generation failed; saving stub");
                apply_stub(&mut article, &source);
            }
            Err(e) => warn!(error = %e, "Generation failed; keeping existing text"),
        }

        article.image = image;
        article.video_url = video_url;
        if article.pub_date.is_none() {
            article.pub_date = found
                .as_ref()
                .and_then(|(_, item)| item.pub_date)
                .or(Some(Utc::now()));
        }
        if article.source.is_none() {
            article.source = source.publisher.clone();
        }
        if !source.link.is_empty() {
            article.original_source = Some(source.link.clone());
        }

        Ok(self.store.save(article, category).await?)
    }

    async fn heal_image(
        &self,
        slug: &str,
        category: Category,
        existing: Option<&Article>,
        feed_image: Option<String>,
        page_url: &str,
    ) -> Option<String> {
        if let Some(article) = existing.filter(|a| a.is_custom_image) {
            debug!("Image pinned by an editor; leaving it");
            return article.image.clone();
        }

        // A real downloaded image is final; a placeholder is only a stopgap.
        let current = existing.and_then(|a| a.image.clone());
        if let Some(image) = current.as_deref() {
            if is_local_media(image) && !self.media.is_placeholder(image) {
                return Some(image.to_string());
            }
        }

        let remote = current.filter(|i| !is_local_media(i));
        for url in remote.iter().chain(feed_image.iter()).unique() {
            if let Some(path) = self.media.download_media(url, slug, MediaKind::Image).await {
                return Some(path);
            }
        }
        if !page_url.is_empty() {
            if let Some(scraped) = self.media.extract_image(page_url).await {
                if let Some(path) = self.media.download_media(&scraped, slug, MediaKind::Image).await {
                    return Some(path);
                }
            }
        }
        Some(self.media.fallback_image(slug, category).await)
    }

    /// Linear scan of every feed for an item whose title slugifies to `slug`.
    async fn find_feed_item(&self, slug: &str) -> Option<(Category, FeedItem)> {
        let feeds = self.feeds.fetch_all(&self.config.feeds).await;
        let found = feeds.into_iter().find_map(|(category, feed)| {
            feed.items
                .into_iter()
                .find(|item| slugify(&item.title) == slug)
                .map(|item| (category, item))
        });
        debug!(found = found.is_some(), "Searched feeds for source item");
        found
    }

    /// Promote every scheduled article whose time has come. Returns the
    /// promoted slugs.
    ///
    /// A scheduled entry with no `scheduled_for` is treated as due.
    #[instrument(level = "info", skip(self))]
    pub async fn publish_scheduled(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut published = Vec::new();
        for entry in self.store.get_scheduled_articles().await {
            if entry.scheduled_for.is_some_and(|at| at > now) {
                continue;
            }
            let Some(mut article) = self.store.get_by_slug(&entry.slug).await else {
                warn!(slug = %entry.slug, "Scheduled entry has no readable record");
                continue;
            };
            if article.status != ArticleStatus::Scheduled {
                continue;
            }

            article.publish(now);
            let category = article.category;
            match self.store.save(article, category).await {
                Ok(_) => {
                    info!(slug = %entry.slug, "Published scheduled article");
                    published.push(entry.slug);
                }
                Err(e) => warn!(slug = %entry.slug, error = %e, "Could not publish"),
            }
        }
        published
    }

    /// Manual image edit: sets the image and pins it against pipeline passes.
    #[instrument(level = "info", skip(self))]
    pub async fn set_custom_image(&self, slug: &str, image: &str) -> Result<PersistedArticle, PipelineError> {
        let mut article = self.load(slug).await?;
        article.image = Some(image.to_string());
        article.is_custom_image = true;
        let category = article.category;
        Ok(self.store.save(article, category).await?)
    }

    #[instrument(level = "info", skip(self))]
    pub async fn schedule(&self, slug: &str, at: DateTime<Utc>) -> Result<PersistedArticle, PipelineError> {
        let mut article = self.load(slug).await?;
        article.schedule(at);
        let category = article.category;
        Ok(self.store.save(article, category).await?)
    }

    async fn load(&self, slug: &str) -> Result<Article, PipelineError> {
        self.store
            .get_by_slug(slug)
            .await
            .ok_or_else(|| StoreError::NotFound(slug.to_string()).into())
    }
}

fn apply_generated(article: &mut Article, generated: GeneratedArticle) {
    article.title = generated.title;
    article.content = generated.content;
    article.tldr = generated.tldr;
    article.meta_description = generated.meta_description;
    article.keywords = generated.keywords;
}

fn apply_stub(article: &mut Article, source: &SourceMaterial) {
    article.title = source.title.clone();
    article.content = source.summary.clone();
    article.tldr.clear();
    article.meta_description.clear();
    article.keywords.clear();
}
