//! Data models for feed items, generated content, and persisted articles.
//!
//! - [`FeedItem`]: one transient candidate read from an RSS/Atom feed
//! - [`GeneratedArticle`]: validated output of the text model
//! - [`Article`]: the persisted record, one JSON file per slug
//! - [`IndexEntry`] / [`IndexSnapshot`]: the listing projection kept in the index file
//!
//! Persisted types serialize with camelCase keys, which is the format the
//! render layer reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed set of site sections. Every feed and every article belongs to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    World,
    Politics,
    Business,
    Technology,
    Science,
    Health,
    Sports,
    Entertainment,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::World,
        Category::Politics,
        Category::Business,
        Category::Technology,
        Category::Science,
        Category::Health,
        Category::Sports,
        Category::Entertainment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::World => "world",
            Category::Politics => "politics",
            Category::Business => "business",
            Category::Technology => "technology",
            Category::Science => "science",
            Category::Health => "health",
            Category::Sports => "sports",
            Category::Entertainment => "entertainment",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown category {s:?}"))
    }
}

/// Publication state. The only transition is `Scheduled -> Published`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    #[default]
    Published,
    Scheduled,
}

/// A candidate story read from a feed. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub summary: String,
    pub pub_date: Option<DateTime<Utc>>,
    pub creator: Option<String>,
    /// Enclosure, `media:content` or `media:thumbnail` URL, in that order.
    pub enclosure: Option<String>,
}

/// A parsed feed, items in document order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedResult {
    pub title: Option<String>,
    pub items: Vec<FeedItem>,
}

/// What the generator rewrites from: a feed item, or an existing article
/// standing in for one during self-heal.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMaterial {
    pub title: String,
    pub summary: String,
    pub link: String,
    pub publisher: Option<String>,
    pub category: Category,
}

impl SourceMaterial {
    pub fn from_feed_item(item: &FeedItem, category: Category) -> Self {
        Self {
            title: item.title.clone(),
            summary: item.summary.clone(),
            link: item.link.clone(),
            publisher: item.creator.clone(),
            category,
        }
    }

    /// Existing article fields used as pseudo-source data when the feed item is gone.
    pub fn from_article(article: &Article) -> Self {
        let summary = if article.meta_description.is_empty() {
            article.content.clone()
        } else {
            article.meta_description.clone()
        };
        Self {
            title: article.title.clone(),
            summary,
            link: article.original_source.clone().unwrap_or_default(),
            publisher: article.source.clone(),
            category: article.category,
        }
    }
}

/// Structured article fields produced by the text model after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedArticle {
    pub title: String,
    pub content: String,
    pub tldr: Vec<String>,
    pub meta_description: String,
    pub keywords: Vec<String>,
}

/// The persisted unit of content.
///
/// `slug` is the primary key; at most one record file exists per slug.
/// `saved_at` is stamped by the store on every write and should not be set
/// by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    #[serde(default)]
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tldr: Vec<String>,
    #[serde(default)]
    pub meta_description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    pub category: Category,
    #[serde(default)]
    pub pub_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    /// Attribution name (publisher or feed creator).
    #[serde(default)]
    pub source: Option<String>,
    /// Publisher URL the story was rewritten from.
    #[serde(default)]
    pub original_source: Option<String>,
    #[serde(default)]
    pub status: ArticleStatus,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Set only by a manual admin edit. Pipeline passes must leave `image` alone when true.
    #[serde(default)]
    pub is_custom_image: bool,
}

impl Article {
    /// A bare published article with only the identifying fields filled in.
    pub fn new(title: impl Into<String>, category: Category) -> Self {
        Self {
            slug: String::new(),
            title: title.into(),
            content: String::new(),
            tldr: Vec::new(),
            meta_description: String::new(),
            keywords: Vec::new(),
            image: None,
            video_url: None,
            category,
            pub_date: None,
            saved_at: None,
            source: None,
            original_source: None,
            status: ArticleStatus::Published,
            scheduled_for: None,
            is_custom_image: false,
        }
    }

    /// The instant listings sort by: `pub_date`, else `saved_at`.
    pub fn sort_key(&self) -> Option<DateTime<Utc>> {
        self.pub_date.or(self.saved_at)
    }

    pub fn schedule(&mut self, at: DateTime<Utc>) {
        self.status = ArticleStatus::Scheduled;
        self.scheduled_for = Some(at);
    }

    /// `Scheduled -> Published`: clears `scheduled_for` and stamps `pub_date`.
    pub fn publish(&mut self, now: DateTime<Utc>) {
        self.status = ArticleStatus::Published;
        self.scheduled_for = None;
        self.pub_date = Some(now);
    }

    pub fn index_entry(&self) -> IndexEntry {
        IndexEntry {
            slug: self.slug.clone(),
            title: self.title.clone(),
            category: self.category,
            image: self.image.clone(),
            tldr: self.tldr.clone(),
            saved_at: self.saved_at,
            pub_date: self.pub_date,
            meta_description: self.meta_description.clone(),
            status: self.status,
            scheduled_for: self.scheduled_for,
        }
    }
}

/// Listing projection of an [`Article`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub slug: String,
    pub title: String,
    pub category: Category,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub tldr: Vec<String>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pub_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub meta_description: String,
    #[serde(default)]
    pub status: ArticleStatus,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl IndexEntry {
    pub fn sort_key(&self) -> Option<DateTime<Utc>> {
        self.pub_date.or(self.saved_at)
    }
}

/// Contents of the index file: `{ "articles": [...] }`, newest first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub articles: Vec<IndexEntry>,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub items: Vec<IndexEntry>,
    pub total: usize,
}
