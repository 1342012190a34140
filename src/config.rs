//! Runtime configuration loaded from `config.yaml`.
//!
//! Every field has a default so a missing file, or a file that only sets a
//! few keys, still yields a usable configuration. Model API keys usually come
//! from the environment (see [`crate::cli::Cli::api_keys`]) rather than the file.

use crate::models::Category;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// One `{slug}.json` file per article.
    pub records_dir: PathBuf,
    /// The single listing index file.
    pub index_path: PathBuf,
    /// Where downloaded media is written.
    pub media_root: PathBuf,
    /// Public URL prefix `media_root` is served under.
    pub media_public_prefix: String,
    /// Public URL prefix of the static per-category placeholder images.
    pub placeholder_prefix: String,
    pub max_index_entries: usize,
    pub max_items_per_feed: usize,
    /// Guards page scrapes, redirect resolution, media downloads and feed fetches.
    pub http_timeout_secs: u64,
    /// Wall-clock ceiling for one batch seed run.
    pub batch_ceiling_secs: u64,
    pub feeds: Vec<FeedSource>,
    /// Image hosts whose pictures are generic aggregator thumbnails.
    pub blocked_image_hosts: Vec<String>,
    /// Template for a generated stand-in image. `{category}` and `{seed}` are substituted.
    pub fallback_image_url: Option<String>,
    pub model: ModelConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSource {
    pub category: Category,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub endpoint: String,
    pub name: String,
    pub api_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Full pool sweeps an interactive generation gets before giving up.
    pub interactive_rounds: usize,
    pub interactive_backoff_ms: u64,
    /// Pause between pool sweeps in batch mode, which never gives up.
    pub batch_backoff_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            records_dir: PathBuf::from("data/articles"),
            index_path: PathBuf::from("data/index.json"),
            media_root: PathBuf::from("public/media"),
            media_public_prefix: "/media".to_string(),
            placeholder_prefix: "/images/placeholders".to_string(),
            max_index_entries: 500,
            max_items_per_feed: 10,
            http_timeout_secs: 15,
            batch_ceiling_secs: 5 * 60 * 60,
            feeds: default_feeds(),
            blocked_image_hosts: vec![
                "news.google.com".to_string(),
                "googleusercontent.com".to_string(),
                "gstatic.com".to_string(),
            ],
            fallback_image_url: None,
            model: ModelConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            name: "gemini-2.0-flash".to_string(),
            api_keys: Vec::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interactive_rounds: 3,
            interactive_backoff_ms: 2_000,
            batch_backoff_secs: 60,
        }
    }
}

fn default_feeds() -> Vec<FeedSource> {
    const GOOGLE_NEWS: &str = "https://news.google.com/rss";
    const LOCALE: &str = "hl=en-US&gl=US&ceid=US:en";

    Category::ALL
        .into_iter()
        .map(|category| {
            let url = match category {
                Category::Politics => format!("{GOOGLE_NEWS}/search?q=politics&{LOCALE}"),
                other => format!(
                    "{GOOGLE_NEWS}/headlines/section/topic/{}?{LOCALE}",
                    other.as_str().to_uppercase()
                ),
            };
            FeedSource { category, url }
        })
        .collect()
}

impl Config {
    /// Load `path`, or the defaults when no path is given.
    #[instrument(level = "info")]
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn Error>> {
        let Some(path) = path else {
            info!("No config file given; using defaults");
            return Ok(Config::default());
        };
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&text)?;
        info!(path = %path.display(), feeds = config.feeds.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn batch_ceiling(&self) -> Duration {
        Duration::from_secs(self.batch_ceiling_secs)
    }
}

impl RetryConfig {
    pub fn interactive_backoff(&self) -> Duration {
        Duration::from_millis(self.interactive_backoff_ms)
    }

    pub fn batch_backoff(&self) -> Duration {
        Duration::from_secs(self.batch_backoff_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_cover_every_category() {
        let config = Config::default();
        for category in Category::ALL {
            assert!(config.feeds.iter().any(|f| f.category == category));
        }
        assert_eq!(config.http_timeout(), Duration::from_secs(15));
        assert_eq!(config.retry.batch_backoff(), Duration::from_secs(60));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
max_index_entries: 50
feeds:
  - category: technology
    url: https://example.com/tech.xml
model:
  api_keys: [a, b]
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.max_index_entries, 50);
        assert_eq!(config.max_items_per_feed, 10);
        assert_eq!(
            config.feeds,
            vec![FeedSource {
                category: Category::Technology,
                url: "https://example.com/tech.xml".to_string()
            }]
        );
        assert_eq!(config.model.api_keys, vec!["a", "b"]);
        assert_eq!(config.model.name, "gemini-2.0-flash");
        assert_eq!(config.retry.interactive_rounds, 3);
    }

    #[test]
    fn no_path_means_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.records_dir, PathBuf::from("data/articles"));
    }
}
