use thiserror::Error;

use crate::js_engine::JsError;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("http status {code} for {url}")]
    HttpStatus { code: u16, url: String },
    #[error("format error: {0}")]
    Format(String),
    #[error("decryption error: {0}")]
    Decryption(String),
    #[error("key fetch error for {site_type}: {reason}")]
    KeyFetch { site_type: String, reason: String },
    #[error("obfuscation error for {site_type}: retry budget exhausted ({last})")]
    Obfuscation {
        site_type: String,
        last: Box<ResolveError>,
    },
    #[error("challenge error: {0}")]
    Challenge(String),
    #[error("script error: {0}")]
    Script(#[from] JsError),
    #[error("script engine unavailable")]
    ScriptUnavailable,
    #[error("request cancelled")]
    Cancelled,
    #[error("http client setup failed: {0}")]
    ClientSetup(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no streams found")]
    NoStreamsFound,
    #[error("unsupported host: {0}")]
    UnsupportedHost(String),
}

impl ResolveError {
    pub fn format(msg: impl Into<String>) -> Self {
        ResolveError::Format(msg.into())
    }

    pub fn decryption(msg: impl Into<String>) -> Self {
        ResolveError::Decryption(msg.into())
    }

    pub fn key_fetch(site_type: impl Into<String>, reason: impl Into<String>) -> Self {
        ResolveError::KeyFetch {
            site_type: site_type.into(),
            reason: reason.into(),
        }
    }

    /// Failures that invalidate a remote key and earn exactly one retry.
    pub fn is_key_retryable(&self) -> bool {
        matches!(
            self,
            ResolveError::Decryption(_)
                | ResolveError::Format(_)
                | ResolveError::KeyFetch { .. }
                | ResolveError::Json(_)
        )
    }

    /// Transport-level failures. Only these may escape an extractor, and only
    /// from the final playlist fetch.
    pub fn is_terminal_fetch(&self) -> bool {
        matches!(
            self,
            ResolveError::Network(_) | ResolveError::HttpStatus { .. } | ResolveError::Cancelled
        )
    }
}

impl From<url::ParseError> for ResolveError {
    fn from(err: url::ParseError) -> Self {
        ResolveError::InvalidUrl(err.to_string())
    }
}
