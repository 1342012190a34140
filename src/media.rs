//! Publisher URL resolution, representative image discovery, and media download.
//!
//! Nothing in here is allowed to fail an ingestion: every operation degrades
//! to `None` or to its unchanged input and logs why.
//!
//! # Image discovery order
//!
//! 1. JSON-LD `image` (strings, `ImageObject`s, arrays, `@graph` members)
//! 2. `og:image`
//! 3. `twitter:image`
//!
//! Candidates on a blocked host (the aggregator's own thumbnail CDN) are
//! skipped; they are almost always a generic default picture.

use crate::config::Config;
use crate::models::Category;
use crate::utils::stable_hash;
use once_cell::sync::Lazy;
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, redirect};
use scraper::{Html, Selector};
use serde_json::Value;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, instrument, warn};
use url::Url;

const BROWSER_USER_AGENT: &str = concat!(
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) ",
    "AppleWebKit/537.36 (KHTML, like Gecko) ",
    "Chrome/127.0.0.0 Safari/537.36"
);

static SEL_JSON_LD: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());
static SEL_OG_IMAGE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="og:image"], meta[name="og:image"], meta[property="og:image:url"]"#)
        .unwrap()
});
static SEL_TWITTER_IMAGE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        r#"meta[name="twitter:image"], meta[property="twitter:image"], meta[name="twitter:image:src"]"#,
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    fn dir(&self) -> &'static str {
        match self {
            MediaKind::Image => "images",
            MediaKind::Video => "videos",
        }
    }

    fn default_ext(&self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
        }
    }

    fn accepts(&self, content_type: &str) -> bool {
        match self {
            MediaKind::Image => content_type.starts_with("image/"),
            MediaKind::Video => {
                content_type.starts_with("video/") || content_type == "application/octet-stream"
            }
        }
    }
}

pub struct MediaResolver {
    client: Client,
    media_root: PathBuf,
    public_prefix: String,
    placeholder_prefix: String,
    blocked_hosts: Vec<String>,
    fallback_template: Option<String>,
}

impl MediaResolver {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .timeout(config.http_timeout())
            .redirect(redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            media_root: config.media_root.clone(),
            public_prefix: config.media_public_prefix.trim_end_matches('/').to_string(),
            placeholder_prefix: config.placeholder_prefix.trim_end_matches('/').to_string(),
            blocked_hosts: config.blocked_image_hosts.clone(),
            fallback_template: config.fallback_image_url.clone(),
        })
    }

    /// Follow redirects from an aggregator link to the publisher's page.
    ///
    /// Falls back to `aggregator_url` unchanged when anything goes wrong.
    #[instrument(level = "info", skip(self))]
    pub async fn resolve_publisher_url(&self, aggregator_url: &str) -> String {
        if let Some(target) = unwrap_encoded_target(aggregator_url) {
            debug!(%target, "Took publisher URL from query string");
            return target;
        }

        match self.client.get(aggregator_url).send().await {
            Ok(response) => {
                let final_url = response.url().to_string();
                if final_url != aggregator_url {
                    info!(%final_url, status = %response.status(), "Resolved publisher URL");
                }
                final_url
            }
            Err(e) => {
                warn!(error = %e, "Could not resolve publisher URL; keeping original");
                aggregator_url.to_string()
            }
        }
    }

    /// Scrape a representative image URL from `page_url`.
    #[instrument(level = "info", skip(self))]
    pub async fn extract_image(&self, page_url: &str) -> Option<String> {
        let base = match Url::parse(page_url) {
            Ok(u) => u,
            Err(e) => {
                warn!(error = %e, "Unparseable page URL");
                return None;
            }
        };

        let response = match self.client.get(base.clone()).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(status = %r.status(), "Page fetch returned non-success status");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Page fetch failed");
                return None;
            }
        };
        // Relative URLs resolve against wherever the redirects ended up.
        let base = response.url().clone();
        let html = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Failed reading page body");
                return None;
            }
        };

        let found = find_image_in_html(&html, &base, &self.blocked_hosts);
        match &found {
            Some(image) => info!(%image, "Found representative image"),
            None => warn!("No usable image on page"),
        }
        found
    }

    /// Download `url` into the media root and return its public path.
    ///
    /// Local paths and `data:` URIs come back unchanged, which keeps repeated
    /// self-heal passes from re-downloading. Any failure yields `None`.
    #[instrument(level = "info", skip(self))]
    pub async fn download_media(&self, url: &str, slug: &str, kind: MediaKind) -> Option<String> {
        if is_local_media(url) {
            debug!("Already local; nothing to download");
            return Some(url.to_string());
        }

        let parsed = match Url::parse(url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => u,
            _ => {
                warn!("Not a downloadable URL");
                return None;
            }
        };

        let response = match self.client.get(parsed.clone()).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Media download failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "Media host returned non-success status");
            return None;
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase());
        if let Some(ct) = content_type.as_deref() {
            if !kind.accepts(ct) {
                warn!(content_type = %ct, "Refusing non-media response");
                return None;
            }
        }

        let bytes = match response.bytes().await {
            Ok(b) if !b.is_empty() => b,
            Ok(_) => {
                warn!("Media response was empty");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed reading media body");
                return None;
            }
        };

        let ext = content_type
            .as_deref()
            .and_then(ext_for_content_type)
            .or_else(|| ext_from_path(&parsed))
            .unwrap_or_else(|| kind.default_ext());
        let filename = media_filename(slug, ext);
        let dir = self.media_root.join(kind.dir());

        if let Err(e) = fs::create_dir_all(&dir).await {
            warn!(dir = %dir.display(), error = %e, "Cannot create media directory");
            return None;
        }
        let path = dir.join(&filename);
        if let Err(e) = fs::write(&path, &bytes).await {
            warn!(path = %path.display(), error = %e, "Cannot write media file");
            return None;
        }

        let public = format!("{}/{}/{}", self.public_prefix, kind.dir(), filename);
        info!(%public, bytes = bytes.len(), "Stored media");
        Some(public)
    }

    /// A stand-in image for an article whose own image could not be obtained.
    ///
    /// Tries the generated fallback service (keyed by [`fallback_key`]) and
    /// otherwise returns the static placeholder for the category.
    #[instrument(level = "info", skip(self))]
    pub async fn fallback_image(&self, slug: &str, category: Category) -> String {
        let key = fallback_key(category, slug);
        if let Some(template) = &self.fallback_template {
            let url = template
                .replace("{category}", category.as_str())
                .replace("{seed}", &urlencoding::encode(&key));
            if let Some(path) = self.download_media(&url, slug, MediaKind::Image).await {
                return path;
            }
        }
        let placeholder = self.placeholder_for(category);
        warn!(%key, %placeholder, "Using category placeholder image");
        placeholder
    }

    /// Download `candidate` if there is one, otherwise fall back. Never empty.
    pub async fn download_or_fallback(
        &self,
        candidate: Option<&str>,
        slug: &str,
        category: Category,
    ) -> String {
        if let Some(url) = candidate {
            if let Some(path) = self.download_media(url, slug, MediaKind::Image).await {
                return path;
            }
        }
        self.fallback_image(slug, category).await
    }

    pub fn placeholder_for(&self, category: Category) -> String {
        format!("{}/{}.jpg", self.placeholder_prefix, category.as_str())
    }

    /// `true` for the static per-category stand-ins from [`Self::placeholder_for`].
    pub fn is_placeholder(&self, image: &str) -> bool {
        image
            .strip_prefix(&self.placeholder_prefix)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Selection key for fallback images: the same article always asks for the same picture.
pub fn fallback_key(category: Category, slug: &str) -> String {
    format!("{}-{}", category.as_str(), stable_hash(slug, 8))
}

/// Site-relative paths and inline data need no download.
pub fn is_local_media(url: &str) -> bool {
    (url.starts_with('/') && !url.starts_with("//")) || url.starts_with("data:")
}

/// Aggregator links sometimes carry the publisher URL in a `url=` parameter.
fn unwrap_encoded_target(link: &str) -> Option<String> {
    let parsed = Url::parse(link).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.into_owned())
        .filter(|v| v.starts_with("http://") || v.starts_with("https://"))
}

/// Pick the representative image from an HTML document, or `None`.
pub fn find_image_in_html(html: &str, base: &Url, blocked_hosts: &[String]) -> Option<String> {
    let document = Html::parse_document(html);

    let from_json_ld = document.select(&SEL_JSON_LD).filter_map(|script| {
        let text = script.text().collect::<String>();
        let value = serde_json::from_str::<Value>(text.trim()).ok()?;
        json_ld_image(&value).map(str::to_string)
    });
    let from_og = document
        .select(&SEL_OG_IMAGE)
        .filter_map(|m| m.value().attr("content").map(str::to_string));
    let from_twitter = document
        .select(&SEL_TWITTER_IMAGE)
        .filter_map(|m| m.value().attr("content").map(str::to_string));

    from_json_ld
        .chain(from_og)
        .chain(from_twitter)
        .filter_map(|candidate| {
            let candidate = candidate.trim();
            if candidate.is_empty() {
                return None;
            }
            base.join(candidate).ok()
        })
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .find(|u| {
            let blocked = is_blocked_host(u, blocked_hosts);
            if blocked {
                debug!(url = %u, "Skipping image on blocked host");
            }
            !blocked
        })
        .map(|u| u.to_string())
}

/// The first image string in a JSON-LD value: walks arrays and `@graph`,
/// then follows `image` through nested `url`/`image` keys.
fn json_ld_image(v: &Value) -> Option<&str> {
    match v {
        Value::Array(items) => items.iter().find_map(json_ld_image),
        Value::Object(map) => map
            .get("image")
            .and_then(image_value_string)
            .or_else(|| map.get("@graph").and_then(json_ld_image)),
        _ => None,
    }
}

fn image_value_string(v: &Value) -> Option<&str> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.as_str()),
        Value::Array(items) => items.iter().find_map(image_value_string),
        Value::Object(map) => map
            .get("url")
            .and_then(image_value_string)
            .or_else(|| map.get("image").and_then(image_value_string))
            .or_else(|| map.get("contentUrl").and_then(image_value_string)),
        _ => None,
    }
}

fn is_blocked_host(url: &Url, blocked_hosts: &[String]) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    blocked_hosts
        .iter()
        .any(|b| host == b || host.ends_with(&format!(".{b}")))
}

fn ext_for_content_type(content_type: &str) -> Option<&'static str> {
    Some(match content_type {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/avif" => "avif",
        "image/svg+xml" => "svg",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        _ => return None,
    })
}

fn ext_from_path(url: &Url) -> Option<&'static str> {
    let last = url.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    const KNOWN: [&str; 10] = ["jpg", "jpeg", "png", "webp", "gif", "avif", "svg", "mp4", "webm", "mov"];
    let ext = ext.to_ascii_lowercase();
    KNOWN
        .into_iter()
        .find(|k| *k == ext)
        .map(|k| if k == "jpeg" { "jpg" } else { k })
}

/// `{slug fragment}-{random suffix}.{ext}`: readable and collision resistant.
fn media_filename(slug: &str, ext: &str) -> String {
    let fragment: String = slug.chars().take(40).collect();
    let fragment = fragment.trim_end_matches('-');
    let suffix: String = rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{fragment}-{suffix}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0];

    fn blocked() -> Vec<String> {
        vec!["googleusercontent.com".to_string(), "news.google.com".to_string()]
    }

    fn base() -> Url {
        Url::parse("https://publisher.example.com/world/story.html").unwrap()
    }

    fn resolver(tmp: &tempfile::TempDir) -> MediaResolver {
        let config = Config {
            media_root: tmp.path().join("media"),
            http_timeout_secs: 5,
            ..Config::default()
        };
        MediaResolver::new(&config).unwrap()
    }

    #[test]
    fn json_ld_beats_meta_tags() {
        let html = r#"<html><head>
            <meta property="og:image" content="https://cdn.example.com/og.jpg">
            <meta name="twitter:image" content="https://cdn.example.com/tw.jpg">
            <script type="application/ld+json">
              {"@type": "NewsArticle", "image": {"@type": "ImageObject", "url": "https://cdn.example.com/ld.jpg"}}
            </script>
        </head></html>"#;
        assert_eq!(
            find_image_in_html(html, &base(), &blocked()).as_deref(),
            Some("https://cdn.example.com/ld.jpg")
        );
    }

    #[test]
    fn json_ld_arrays_and_graph() {
        let html = r#"<script type="application/ld+json">
            [{"@type": "WebSite"}, {"@graph": [{"@type": "NewsArticle", "image": [["https://cdn.example.com/a.jpg"], "https://cdn.example.com/b.jpg"]}]}]
        </script>"#;
        assert_eq!(
            find_image_in_html(html, &base(), &blocked()).as_deref(),
            Some("https://cdn.example.com/a.jpg")
        );
    }

    #[test]
    fn relative_og_image_resolves_against_page() {
        let html = r#"<meta property="og:image" content="/img/lead.png">"#;
        assert_eq!(
            find_image_in_html(html, &base(), &blocked()).as_deref(),
            Some("https://publisher.example.com/img/lead.png")
        );
    }

    #[test]
    fn twitter_image_is_last_resort() {
        let html = r#"<script type="application/ld+json">{not json}</script>
            <meta name="twitter:image" content="https://cdn.example.com/tw.jpg">"#;
        assert_eq!(
            find_image_in_html(html, &base(), &blocked()).as_deref(),
            Some("https://cdn.example.com/tw.jpg")
        );
    }

    #[test]
    fn blocked_hosts_are_skipped() {
        let html = r#"<script type="application/ld+json">{"image": "https://lh3.googleusercontent.com/x.jpg"}</script>
            <meta property="og:image" content="https://cdn.example.com/og.jpg">"#;
        assert_eq!(
            find_image_in_html(html, &base(), &blocked()).as_deref(),
            Some("https://cdn.example.com/og.jpg")
        );

        let only_blocked = r#"<meta property="og:image" content="https://news.google.com/logo.png">"#;
        assert_eq!(find_image_in_html(only_blocked, &base(), &blocked()), None);
        assert_eq!(find_image_in_html("<p>no images</p>", &base(), &blocked()), None);
    }

    #[test]
    fn local_media_detection() {
        assert!(is_local_media("/media/images/a.jpg"));
        assert!(is_local_media("data:image/png;base64,AAAA"));
        assert!(!is_local_media("//cdn.example.com/a.jpg"));
        assert!(!is_local_media("https://cdn.example.com/a.jpg"));
    }

    #[test]
    fn fallback_key_is_deterministic() {
        let a = fallback_key(Category::Science, "probe-lands");
        assert_eq!(a, fallback_key(Category::Science, "probe-lands"));
        assert!(a.starts_with("science-"));
        assert_ne!(a, fallback_key(Category::Science, "probe-launches"));
    }

    #[test]
    fn media_filenames_differ_per_call() {
        let a = media_filename("g7-summit-ends", "jpg");
        let b = media_filename("g7-summit-ends", "jpg");
        assert!(a.starts_with("g7-summit-ends-") && a.ends_with(".jpg"));
        assert_ne!(a, b);
    }

    #[test]
    fn extension_detection() {
        assert_eq!(ext_for_content_type("image/webp"), Some("webp"));
        assert_eq!(ext_for_content_type("text/html"), None);
        let u = Url::parse("https://cdn.example.com/photos/lead.JPEG?w=800").unwrap();
        assert_eq!(ext_from_path(&u), Some("jpg"));
        let u = Url::parse("https://cdn.example.com/photos/lead").unwrap();
        assert_eq!(ext_from_path(&u), None);
    }

    #[tokio::test]
    async fn resolve_follows_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/abc"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/story", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/story"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let media = resolver(&tmp);
        let resolved = media
            .resolve_publisher_url(&format!("{}/r/abc", server.uri()))
            .await;
        assert_eq!(resolved, format!("{}/story", server.uri()));
    }

    #[tokio::test]
    async fn resolve_keeps_input_on_failure_and_unwraps_url_param() {
        let tmp = tempfile::tempdir().unwrap();
        let media = resolver(&tmp);

        let dead = "http://127.0.0.1:1/r/abc";
        assert_eq!(media.resolve_publisher_url(dead).await, dead);

        let wrapped = "https://news.google.com/articles/x?url=https%3A%2F%2Fpub.example.com%2Fa&oc=5";
        assert_eq!(
            media.resolve_publisher_url(wrapped).await,
            "https://pub.example.com/a"
        );
    }

    #[tokio::test]
    async fn extract_image_from_served_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/story"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><head><meta property="og:image" content="/lead.jpg"></head></html>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let media = resolver(&tmp);
        assert_eq!(
            media.extract_image(&format!("{}/story", server.uri())).await,
            Some(format!("{}/lead.jpg", server.uri()))
        );
        assert_eq!(media.extract_image(&format!("{}/gone", server.uri())).await, None);
    }

    #[tokio::test]
    async fn download_writes_file_under_media_root() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lead"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/png")
                    .set_body_bytes(PNG_BYTES),
            )
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let media = resolver(&tmp);
        let public = media
            .download_media(&format!("{}/lead", server.uri()), "g7-summit-ends", MediaKind::Image)
            .await
            .unwrap();

        assert!(public.starts_with("/media/images/g7-summit-ends-"));
        assert!(public.ends_with(".png"));
        let filename = public.rsplit('/').next().unwrap();
        let on_disk = std::fs::read(tmp.path().join("media/images").join(filename)).unwrap();
        assert_eq!(on_disk, PNG_BYTES);
    }

    #[tokio::test]
    async fn download_is_a_no_op_for_local_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let media = resolver(&tmp);
        let local = "/media/images/already-here.jpg";
        assert_eq!(
            media.download_media(local, "x", MediaKind::Image).await.as_deref(),
            Some(local)
        );
        let data = "data:image/gif;base64,R0lGOD";
        assert_eq!(
            media.download_media(data, "x", MediaKind::Image).await.as_deref(),
            Some(data)
        );
        assert!(!tmp.path().join("media").exists());
    }

    #[tokio::test]
    async fn download_failures_are_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/error-page.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/html; charset=utf-8")
                    .set_body_string("<html>blocked</html>"),
            )
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let media = resolver(&tmp);
        for url in [
            format!("{}/missing.jpg", server.uri()),
            format!("{}/error-page.jpg", server.uri()),
            "http://127.0.0.1:1/x.jpg".to_string(),
            "ftp://example.com/x.jpg".to_string(),
        ] {
            assert_eq!(media.download_media(&url, "s", MediaKind::Image).await, None, "{url}");
        }
    }

    #[tokio::test]
    async fn unreachable_image_falls_back_to_stable_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let media = resolver(&tmp);
        let dead = Some("http://127.0.0.1:1/lead.jpg");

        let first = media.download_or_fallback(dead, "probe-lands", Category::Science).await;
        let second = media.download_or_fallback(dead, "probe-lands", Category::Science).await;
        assert_eq!(first, "/images/placeholders/science.jpg");
        assert_eq!(first, second);

        let none = media.download_or_fallback(None, "probe-lands", Category::Sports).await;
        assert_eq!(none, "/images/placeholders/sports.jpg");
    }

    #[test]
    fn placeholders_are_recognised() {
        let tmp = tempfile::tempdir().unwrap();
        let media = resolver(&tmp);
        assert!(media.is_placeholder(&media.placeholder_for(Category::World)));
        assert!(!media.is_placeholder("/media/images/summit-ab12cd34.jpg"));
        assert!(!media.is_placeholder("/images/placeholders-old/world.jpg"));
    }

    #[tokio::test]
    async fn fallback_service_is_keyed_by_category_and_slug() {
        let server = MockServer::start().await;
        let key = fallback_key(Category::Health, "flu-season");
        Mock::given(method("GET"))
            .and(path(format!("/fallback/health/{key}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/jpeg")
                    .set_body_bytes(vec![0xff, 0xd8, 0xff, 0xe0]),
            )
            .expect(2)
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            media_root: tmp.path().join("media"),
            http_timeout_secs: 5,
            fallback_image_url: Some(format!("{}/fallback/{{category}}/{{seed}}", server.uri())),
            ..Config::default()
        };
        let media = MediaResolver::new(&config).unwrap();

        for _ in 0..2 {
            let path = media
                .download_or_fallback(Some("http://127.0.0.1:1/x.jpg"), "flu-season", Category::Health)
                .await;
            assert!(path.starts_with("/media/images/flu-season-"), "{path}");
        }
    }
}
