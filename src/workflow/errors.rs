//! Failures talking to the upstream design-source API.
//!
//! HTTP statuses are mapped to variants (429 -> `RateLimited`, 5xx ->
//! `Server`, ...) so retry policies can decide on the variant alone.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP 429.
    #[error("rate limited by upstream")]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 401.
    #[error("unauthorized; check the Figma access token")]
    Unauthorized,

    /// HTTP 403.
    #[error("forbidden; the token cannot read this file")]
    Forbidden,

    /// HTTP 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// HTTP 5xx.
    #[error("upstream server error: status {0}")]
    Server(u16),

    /// Any other non-success status.
    #[error("http status error: {0}")]
    HttpStatus(u16),

    #[error("request timed out")]
    Timeout,

    /// DNS/connect/reset without a status.
    #[error("network error: {0}")]
    Network(String),

    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    /// The API answered 200 but reported an error in its body.
    #[error("upstream reported an error: {0}")]
    Upstream(String),

    #[error("upstream returned no render URL for node {node_id}")]
    MissingRender { node_id: String },

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<TransportError>,
    },
}

impl TransportError {
    pub fn from_status(status: u16, retry_after_secs: Option<u64>, resource: &str) -> Self {
        match status {
            429 => Self::RateLimited { retry_after_secs },
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound(resource.to_owned()),
            500..=599 => Self::Server(status),
            _ => Self::HttpStatus(status),
        }
    }

    /// Whether the same request may succeed if repeated after a pause.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server(_) | Self::Timeout | Self::Network(_)
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::RetriesExhausted { last, .. } => last.is_rate_limited(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }
        if error.is_decode() {
            return Self::Decode(error.to_string());
        }
        if let Some(status) = error.status() {
            let resource = error
                .url()
                .map(|url| url.path().to_owned())
                .unwrap_or_default();
            return Self::from_status(status.as_u16(), None, &resource);
        }
        Self::Network(error.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}
