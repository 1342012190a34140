//! RSS/Atom feed reader.
//!
//! Fetches one feed per category and normalizes its entries into
//! [`FeedItem`]s, preserving document order. Network and parse failures are
//! logged and reported as `None`; the orchestrator treats that as "no items
//! this pass" and simply tries again next cycle.

use crate::config::FeedSource;
use crate::models::{Category, FeedItem, FeedResult};
use chrono::Utc;
use feed_rs::model::Entry;
use feed_rs::parser::{self, ParseFeedError};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use scraper::Html;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Query parameter appended to every feed request to get past intermediary caches.
pub const CACHE_BUST_PARAM: &str = "_cb";

pub struct FeedReader {
    client: Client,
}

impl FeedReader {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("newsroom/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Fetch and parse one feed. `None` on any network, HTTP or parse failure.
    #[instrument(level = "info", skip(self))]
    pub async fn fetch_feed(&self, feed_url: &str) -> Option<FeedResult> {
        let url = match cache_busted(feed_url) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Invalid feed URL");
                return None;
            }
        };

        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Feed fetch failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "Feed returned non-success status");
            return None;
        }
        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "Failed reading feed body");
                return None;
            }
        };

        match parse_feed(&bytes) {
            Ok(feed) => {
                info!(items = feed.items.len(), title = ?feed.title, "Parsed feed");
                Some(feed)
            }
            Err(e) => {
                warn!(error = %e, bytes = bytes.len(), "Feed did not parse");
                None
            }
        }
    }

    /// Fetch every configured feed one after another, dropping the ones that fail.
    #[instrument(level = "info", skip_all, fields(feeds = sources.len()))]
    pub async fn fetch_all(&self, sources: &[FeedSource]) -> Vec<(Category, FeedResult)> {
        let feeds: Vec<(Category, FeedResult)> = stream::iter(sources)
            .then(|source| async move {
                self.fetch_feed(&source.url)
                    .await
                    .map(|feed| (source.category, feed))
            })
            .filter_map(std::future::ready)
            .collect()
            .await;

        debug!(fetched = feeds.len(), "Fetched feeds");
        feeds
    }
}

/// `feed_url` with a fresh cache-busting query parameter.
pub fn cache_busted(feed_url: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(feed_url)?;
    url.query_pairs_mut()
        .append_pair(CACHE_BUST_PARAM, &Utc::now().timestamp_millis().to_string());
    Ok(url)
}

/// Parse an RSS 2.0 or Atom document. Entries without a title are dropped.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedResult, ParseFeedError> {
    let feed = parser::parse(bytes)?;
    let title = feed.title.map(|t| t.content.trim().to_string());
    let items = feed.entries.into_iter().filter_map(entry_to_item).collect();
    Ok(FeedResult { title, items })
}

fn entry_to_item(entry: Entry) -> Option<FeedItem> {
    let title = entry
        .title
        .as_ref()
        .map(|t| plain_text(&t.content))
        .filter(|t| !t.is_empty());
    let Some(title) = title else {
        debug!(id = %entry.id, "Dropping feed entry without a title");
        return None;
    };

    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().is_none_or(|rel| rel == "alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.clone())
        .unwrap_or_default();

    let summary = entry
        .summary
        .as_ref()
        .map(|s| s.content.as_str())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.as_deref()))
        .map(plain_text)
        .unwrap_or_default();

    let enclosure = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
        .or_else(|| {
            entry
                .media
                .iter()
                .flat_map(|m| m.thumbnails.iter())
                .map(|t| t.image.uri.clone())
                .next()
        });

    let creator = entry
        .authors
        .first()
        .map(|p| p.name.trim().to_string())
        .filter(|n| !n.is_empty());

    Some(FeedItem {
        title,
        link,
        summary,
        pub_date: entry.published.or(entry.updated),
        creator,
        enclosure,
    })
}

/// Feed summaries are frequently HTML fragments; keep only their text.
fn plain_text(fragment: &str) -> String {
    let doc = Html::parse_fragment(fragment);
    let text: String = doc.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
