//! Error types for the ingestion pipeline.
//!
//! Component operations that are allowed to degrade (feed fetches, image
//! scraping, media downloads) return `Option` and log instead of using these
//! types. The enums below cover the places where a caller has to make a
//! decision: the model client, the generator's failover policy, the article
//! store, and the orchestrator boundary.

use reqwest::StatusCode;
use thiserror::Error;

/// A single call to the text model failed.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Quota or capacity errors. These are the only errors the credential
    /// pool fails over on.
    #[error("rate limited ({status}): {message}")]
    RateLimited { status: StatusCode, message: String },

    #[error("model API error ({status}): {body}")]
    Api { status: StatusCode, body: String },

    #[error("HTTP error talking to model: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model returned no text")]
    EmptyResponse,
}

impl ModelError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ModelError::RateLimited { .. })
    }
}

/// Generation of one structured article failed.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no model credentials configured")]
    NoCredentials,

    #[error("every credential is rate limited after {rounds} round(s)")]
    PoolExhausted { rounds: usize },

    #[error(transparent)]
    Model(ModelError),

    #[error("model response is not valid JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("model response is missing required fields: {0}")]
    Invalid(String),
}

impl GenerationError {
    /// Configuration problems that no retry or stub can work around.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GenerationError::NoCredentials)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid slug: {0:?}")]
    InvalidSlug(String),

    #[error("no article with slug {0:?}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("nothing to heal for slug {0:?}: no feed item and no existing article")]
    NotFound(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

impl PipelineError {
    /// Errors that end a whole run rather than one item.
    pub fn is_fatal(&self) -> bool {
        match self {
            PipelineError::Generation(e) => e.is_fatal(),
            PipelineError::Http(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_classification() {
        let e = ModelError::RateLimited {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "quota".to_string(),
        };
        assert!(e.is_rate_limited());

        let e = ModelError::Api {
            status: StatusCode::UNAUTHORIZED,
            body: "bad key".to_string(),
        };
        assert!(!e.is_rate_limited());
    }

    #[test]
    fn only_missing_credentials_are_fatal() {
        assert!(GenerationError::NoCredentials.is_fatal());
        assert!(!GenerationError::PoolExhausted { rounds: 3 }.is_fatal());
        assert!(!GenerationError::Invalid("title".to_string()).is_fatal());

        assert!(PipelineError::from(GenerationError::NoCredentials).is_fatal());
        assert!(!PipelineError::NotFound("gone".to_string()).is_fatal());
        assert!(!PipelineError::from(StoreError::InvalidSlug("X".to_string())).is_fatal());
    }
}
