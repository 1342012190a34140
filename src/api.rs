//! Generative model interaction with credential failover and backoff.
//!
//! # Architecture
//!
//! - [`AskAsync`]: one model client bound to one credential
//! - [`GeminiClient`]: the `generateContent` implementation of [`AskAsync`]
//! - [`ContentGenerator`]: an ordered pool of clients plus a rotating cursor,
//!   the prompt template, and response parsing/validation
//!
//! # Failover
//!
//! Each call starts at the cursor. A success moves the cursor one past the
//! client that answered, spreading load round-robin. A rate-limited client is
//! skipped and the rest of the pool is swept in order. Any other error stops
//! the call immediately. When a whole sweep is rate limited:
//!
//! - [`Urgency::Interactive`]: back off (exponential, 30 s cap, 0-250 ms
//!   jitter) and sweep again, up to `interactive_rounds` sweeps in total
//! - [`Urgency::Batch`]: wait the fixed batch backoff and sweep forever

use crate::config::{ModelConfig, RetryConfig};
use crate::error::{GenerationError, ModelError};
use crate::models::{GeneratedArticle, SourceMaterial};
use crate::utils::{looks_truncated, strip_code_fences, truncate_for_log};
use itertools::Itertools;
use rand::{Rng, rng};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

const MAX_INTERACTIVE_DELAY: StdDuration = StdDuration::from_secs(30);
const META_DESCRIPTION_LIMIT: usize = 160;

/// Trait for async model interaction.
///
/// Implementors send a prompt to a text model on behalf of one credential
/// and return the raw completion text.
pub trait AskAsync {
    async fn ask(&self, prompt: &str) -> Result<String, ModelError>;

    /// Short, non-secret name for logs.
    fn label(&self) -> String {
        "model".to_string()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

/// A `generateContent` client for one API key.
pub struct GeminiClient {
    http: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("key", &self.label())
            .finish()
    }
}

impl GeminiClient {
    pub fn new(http: Client, config: &ModelConfig, api_key: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.name.clone(),
            api_key: api_key.into(),
        }
    }
}

impl AskAsync for GeminiClient {
    #[instrument(level = "debug", skip_all, fields(key = %self.label()))]
    async fn ask(&self, prompt: &str) -> Result<String, ModelError> {
        let t0 = Instant::now();
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature: 0.7,
            },
        };

        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(elapsed_ms = t0.elapsed().as_millis() as u64, %status, "Model call failed");
            return Err(classify_failure(status, body));
        }

        let parsed: GeminiResponse = response.json().await?;
        let text = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        debug!(elapsed_ms = t0.elapsed().as_millis() as u64, bytes = text.len(), "Model call succeeded");
        if text.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(text)
    }

    fn label(&self) -> String {
        let tail: String = self
            .api_key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("…{tail}")
    }
}

/// Quota and capacity failures are rate-limit class; everything else is not.
fn classify_failure(status: StatusCode, body: String) -> ModelError {
    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::SERVICE_UNAVAILABLE
        || body.contains("RESOURCE_EXHAUSTED");
    if rate_limited {
        ModelError::RateLimited {
            status,
            message: truncate_for_log(&body, 300),
        }
    } else {
        ModelError::Api {
            status,
            body: truncate_for_log(&body, 300),
        }
    }
}

/// How hard the generator tries when every credential is rate limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    /// Someone is waiting: a few backed-off sweeps, then an error.
    Interactive,
    /// Scheduled bulk ingestion: keep sweeping until something answers.
    Batch,
}

/// Pool of model credentials with a round-robin cursor.
///
/// The cursor belongs to this instance; share the generator (e.g. behind an
/// `Arc`) to share rotation state.
pub struct ContentGenerator<M = GeminiClient> {
    pool: Vec<M>,
    cursor: AtomicUsize,
    retry: RetryConfig,
}

impl<M> fmt::Debug for ContentGenerator<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentGenerator")
            .field("credentials", &self.pool.len())
            .field("cursor", &self.cursor.load(Ordering::Relaxed))
            .field("retry", &self.retry)
            .finish()
    }
}

impl ContentGenerator<GeminiClient> {
    /// One [`GeminiClient`] per configured key, sharing a connection pool.
    pub fn from_config(config: &ModelConfig, retry: RetryConfig) -> Result<Self, reqwest::Error> {
        // No overall request timeout: batch generation is bounded by the run's wall clock.
        let http = Client::builder()
            .connect_timeout(StdDuration::from_secs(15))
            .build()?;
        let pool = config
            .api_keys
            .iter()
            .filter(|k| !k.trim().is_empty())
            .map(|key| GeminiClient::new(http.clone(), config, key.trim()))
            .collect();
        Ok(Self::new(pool, retry))
    }
}

impl<M: AskAsync> ContentGenerator<M> {
    pub fn new(pool: Vec<M>, retry: RetryConfig) -> Self {
        Self {
            pool,
            cursor: AtomicUsize::new(0),
            retry,
        }
    }

    pub fn credentials(&self) -> usize {
        self.pool.len()
    }

    /// Index of the client the next call starts with.
    #[cfg(test)]
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Generate a structured article for `source`.
    ///
    /// A response that was cut off mid-JSON is asked for once more before
    /// being reported as malformed.
    #[instrument(level = "info", skip_all, fields(title = %source.title, urgency = ?urgency))]
    pub async fn generate(
        &self,
        source: &SourceMaterial,
        urgency: Urgency,
    ) -> Result<GeneratedArticle, GenerationError> {
        let t0 = Instant::now();
        let prompt = build_prompt(source);

        let raw = self.ask_pool(&prompt, urgency).await?;
        let parsed = match parse_generated(&raw) {
            Err(GenerationError::MalformedJson(e)) if looks_truncated(&e) => {
                warn!(error = %e, "EOF while parsing; re-asking once");
                let retry = self.ask_pool(&prompt, urgency).await?;
                parse_generated(&retry)
            }
            other => other,
        };

        match &parsed {
            Ok(article) => info!(
                elapsed_ms = t0.elapsed().as_millis() as u64,
                words = article.content.split_whitespace().count(),
                "Generated article"
            ),
            Err(e) => warn!(
                error = %e,
                response_preview = %truncate_for_log(&raw, 300),
                "Model returned unusable output"
            ),
        }
        parsed
    }

    /// Send `prompt` through the pool according to the failover policy.
    #[instrument(level = "info", skip_all, fields(urgency = ?urgency))]
    pub async fn ask_pool(&self, prompt: &str, urgency: Urgency) -> Result<String, GenerationError> {
        if self.pool.is_empty() {
            error!("No model credentials configured");
            return Err(GenerationError::NoCredentials);
        }

        let mut round = 0usize;
        loop {
            round += 1;
            if let Some(text) = self.sweep(prompt).await.map_err(GenerationError::Model)? {
                return Ok(text);
            }

            let delay = match urgency {
                Urgency::Interactive => {
                    if round >= self.retry.interactive_rounds.max(1) {
                        error!(round, "Every credential rate limited; giving up");
                        return Err(GenerationError::PoolExhausted { rounds: round });
                    }
                    interactive_delay(self.retry.interactive_backoff(), round)
                }
                Urgency::Batch => self.retry.batch_backoff(),
            };
            warn!(round, ?delay, credentials = self.pool.len(), "Every credential rate limited; backing off");
            sleep(delay).await;
        }
    }

    /// One pass over the pool starting at the cursor. `Ok(None)` means every
    /// client was rate limited.
    async fn sweep(&self, prompt: &str) -> Result<Option<String>, ModelError> {
        let len = self.pool.len();
        let start = self.cursor.load(Ordering::Relaxed) % len;

        for offset in 0..len {
            let idx = (start + offset) % len;
            let client = &self.pool[idx];
            match client.ask(prompt).await {
                Ok(text) => {
                    self.cursor.store((idx + 1) % len, Ordering::Relaxed);
                    debug!(credential = %client.label(), idx, "Model answered");
                    return Ok(Some(text));
                }
                Err(e) if e.is_rate_limited() => {
                    warn!(credential = %client.label(), idx, error = %e, "Rate limited; trying next credential");
                }
                Err(e) => {
                    error!(credential = %client.label(), idx, error = %e, "Model call failed; not failing over");
                    return Err(e);
                }
            }
        }
        Ok(None)
    }
}

/// `base * 2^(round-1)`, capped, plus 0-250 ms of jitter.
fn interactive_delay(base: StdDuration, round: usize) -> StdDuration {
    let shift = (round.saturating_sub(1)).min(16) as u32;
    let delay = base.saturating_mul(1 << shift).min(MAX_INTERACTIVE_DELAY);
    let jitter_ms: u64 = rng().random_range(0..=250);
    delay + StdDuration::from_millis(jitter_ms)
}

/// The fixed rewrite prompt. The output contract is a bare JSON object.
pub fn build_prompt(source: &SourceMaterial) -> String {
    let publisher = source.publisher.as_deref().unwrap_or("unknown");
    format!(
        r#"You are a senior news editor. Rewrite the story below as an original, factual news article for the "{category}" section.

Requirements:
- 600 to 900 words of Markdown.
- Start with a one-line headline as a level-1 heading, then use level-2 subheadings for sections.
- Include a "Key facts" section as a bulleted list.
- Do not invent quotes, numbers or events that are not supported by the source.
- Provide an executive summary of exactly 3 short points.
- Provide an SEO meta description of at most 160 characters and 5 to 8 keywords.

Output contract: respond with ONE JSON object and nothing else. No prose, no code fences.
{{"title": string, "content": string (Markdown), "tldr": [string, string, string], "metaDescription": string, "keywords": [string, ...]}}

Source headline: {title}
Source publisher: {publisher}
Source link: {link}
Source summary: {summary}
"#,
        category = source.category,
        title = source.title,
        publisher = publisher,
        link = source.link,
        summary = source.summary,
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGeneration {
    title: Option<String>,
    content: Option<String>,
    #[serde(default)]
    tldr: Vec<String>,
    meta_description: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
}

/// Parse a raw completion, then check it against the expected shape.
///
/// JSON syntax problems are [`GenerationError::MalformedJson`]; a parsed
/// object lacking `title` or `content` is [`GenerationError::Invalid`].
/// Optional fields are repaired rather than rejected.
pub fn parse_generated(raw: &str) -> Result<GeneratedArticle, GenerationError> {
    let body = strip_code_fences(raw);
    let parsed: RawGeneration = serde_json::from_str(body)?;

    let title = parsed.title.map(|t| t.trim().to_string()).unwrap_or_default();
    let content = parsed.content.map(|c| c.trim().to_string()).unwrap_or_default();
    let missing: Vec<&str> = [("title", title.is_empty()), ("content", content.is_empty())]
        .into_iter()
        .filter_map(|(name, empty)| empty.then_some(name))
        .collect();
    if !missing.is_empty() {
        return Err(GenerationError::Invalid(missing.join(", ")));
    }

    let tldr = parsed
        .tldr
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .take(3)
        .collect();
    let keywords = parsed
        .keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .unique_by(|k| k.to_lowercase())
        .collect();
    let meta_description = parsed
        .meta_description
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| description_from_content(&content));

    Ok(GeneratedArticle {
        title,
        content,
        tldr,
        meta_description,
        keywords,
    })
}

/// First sentence-ish of body text, skipping Markdown headings.
fn description_from_content(content: &str) -> String {
    let text = content
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .flat_map(|l| l.split_whitespace())
        .map(|w| w.trim_matches('*'))
        .filter(|w| !w.is_empty())
        .join(" ");
    match text.char_indices().nth(META_DESCRIPTION_LIMIT - 3) {
        None => text,
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
    }
}
