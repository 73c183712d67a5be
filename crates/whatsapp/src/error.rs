use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited. Retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Gateway error: {0}")]
    Api(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

// Shapes the protocol layer puts in error text when WhatsApp throttles pairing or
// sending. Only consulted when the gateway did not answer with a 429.
static RATE_LIMIT_RE: OnceLock<Regex> = OnceLock::new();

impl ClientError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ClientError::Auth(_) => "Authentication failed. Please relink the device.",
            ClientError::RateLimited { .. } => "Rate limited by WhatsApp. Please slow down.",
            ClientError::Network(_) => "Network error. Check the gateway connection.",
            ClientError::Validation(_) => "Invalid input. Please check the phone number.",
            ClientError::Api(_) => "Gateway error. Please try again later.",
            ClientError::Timeout(_) => "Request timed out. Please try again.",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::RateLimited { .. } | ClientError::Network(_) | ClientError::Timeout(_)
        )
    }

    /// True for a structured 429 and for untyped errors whose text looks like a
    /// throttling response.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ClientError::RateLimited { .. } => true,
            ClientError::Network(e) => e.status().map(|s| s.as_u16()) == Some(429),
            other => looks_rate_limited(&other.to_string()),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

pub fn looks_rate_limited(msg: &str) -> bool {
    RATE_LIMIT_RE
        .get_or_init(|| {
            Regex::new(r"(?i)\b429\b|rate[-_ ]?(over)?limit|too many\b").unwrap()
        })
        .is_match(msg)
}
