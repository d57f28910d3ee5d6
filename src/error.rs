use serde::{Serialize, Serializer};
use thiserror::Error;

/// Failures surfaced by the brief backend.
///
/// Every variant owns plain strings so one result can be cloned out to all
/// waiters of a coalesced fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BriefError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    /// `retry_at` is the Unix time the API reported for quota reset, if any.
    #[error("rate limited by {service}{}", retry_suffix(.retry_at))]
    RateLimit {
        service: String,
        retry_at: Option<i64>,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(String),
}

fn retry_suffix(retry_at: &Option<i64>) -> String {
    retry_at
        .map(|ts| format!(" (resets at {})", ts))
        .unwrap_or_default()
}

impl BriefError {
    pub fn kind(&self) -> &'static str {
        match self {
            BriefError::Config(_) => "config",
            BriefError::Auth(_) => "auth",
            BriefError::Network(_) => "network",
            BriefError::RateLimit { .. } => "rate_limit",
            BriefError::Parse(_) => "parse",
            BriefError::Storage(_) => "storage",
        }
    }

    pub fn timeout(source: &str, secs: u64) -> Self {
        BriefError::Network(format!("{} did not respond within {}s", source, secs))
    }
}

impl Serialize for BriefError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<reqwest::Error> for BriefError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest includes the request URL, never headers, so no token leaks here.
        if err.is_decode() {
            BriefError::Parse(err.to_string())
        } else {
            BriefError::Network(err.without_url().to_string())
        }
    }
}

impl From<rusqlite::Error> for BriefError {
    fn from(err: rusqlite::Error) -> Self {
        BriefError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for BriefError {
    fn from(err: std::io::Error) -> Self {
        BriefError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for BriefError {
    fn from(err: anyhow::Error) -> Self {
        BriefError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BriefError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_message_includes_reset_time() {
        let err = BriefError::RateLimit {
            service: "GitHub".to_string(),
            retry_at: Some(1_700_000_000),
        };
        assert_eq!(err.to_string(), "rate limited by GitHub (resets at 1700000000)");
        assert_eq!(err.kind(), "rate_limit");
    }

    #[test]
    fn serializes_as_display_string() {
        let err = BriefError::Auth("token rejected".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"authentication failed: token rejected\"");
    }
}
