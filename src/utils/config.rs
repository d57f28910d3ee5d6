use std::time::Duration;

use crate::services::github::GITHUB_API_BASE;
use crate::services::retry::RetryPolicy;

const ENV_GITHUB_API_URL: &str = "WTFTODAY_GITHUB_API_URL";
const ENV_GITHUB_TTL: &str = "WTFTODAY_GITHUB_TTL_SECS";
const ENV_CALENDAR_TTL: &str = "WTFTODAY_CALENDAR_TTL_SECS";
const ENV_EMAIL_TTL: &str = "WTFTODAY_EMAIL_TTL_SECS";
const ENV_SOURCE_TIMEOUT: &str = "WTFTODAY_SOURCE_TIMEOUT_SECS";
const ENV_SOON_WINDOW: &str = "WTFTODAY_SOON_WINDOW_MINS";
const ENV_CREDENTIAL_STORE: &str = "WTFTODAY_CREDENTIAL_STORE";

pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

/// Where credentials are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialBackend {
    /// The OS keychain, falling back to the database when there is none.
    Keychain,
    /// The `credentials` table of the local database.
    Database,
}

impl CredentialBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "keychain" | "keyring" => Some(CredentialBackend::Keychain),
            "database" | "sqlite" => Some(CredentialBackend::Database),
            _ => None,
        }
    }
}

/// Runtime knobs of the brief backend. User-facing settings live in SQLite;
/// these only come from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct BriefConfig {
    pub github_api_url: String,
    pub github_ttl: Duration,
    pub calendar_ttl: Duration,
    pub email_ttl: Duration,
    /// Longest a single source may hold up a brief.
    pub source_timeout: Duration,
    /// Lookahead for `is_soon`.
    pub soon_window: Duration,
    pub retry: RetryPolicy,
    pub credential_store: CredentialBackend,
}

impl Default for BriefConfig {
    fn default() -> Self {
        Self {
            github_api_url: GITHUB_API_BASE.to_string(),
            github_ttl: Duration::from_secs(300),
            calendar_ttl: Duration::from_secs(900),
            email_ttl: Duration::from_secs(300),
            source_timeout: Duration::from_secs(12),
            soon_window: Duration::from_secs(30 * 60),
            retry: RetryPolicy::default(),
            credential_store: CredentialBackend::Keychain,
        }
    }
}

impl BriefConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let secs = |key: &str| {
            let raw = value(key)?;
            match raw.parse::<u64>() {
                Ok(n) => Some(n),
                Err(_) => {
                    log::warn!("Ignoring {}={}: not a whole number", key, raw);
                    None
                }
            }
        };

        if let Some(url) = value(ENV_GITHUB_API_URL) {
            config.github_api_url = url;
        }
        if let Some(n) = secs(ENV_GITHUB_TTL) {
            config.github_ttl = Duration::from_secs(n);
        }
        if let Some(n) = secs(ENV_CALENDAR_TTL) {
            config.calendar_ttl = Duration::from_secs(n);
        }
        if let Some(n) = secs(ENV_EMAIL_TTL) {
            config.email_ttl = Duration::from_secs(n);
        }
        if let Some(n) = secs(ENV_SOURCE_TIMEOUT) {
            config.source_timeout = Duration::from_secs(n.max(1));
        }
        if let Some(n) = secs(ENV_SOON_WINDOW) {
            config.soon_window = Duration::from_secs(n * 60);
        }
        if let Some(raw) = value(ENV_CREDENTIAL_STORE) {
            match CredentialBackend::parse(&raw) {
                Some(backend) => config.credential_store = backend,
                None => log::warn!("Ignoring {}={}: expected keychain or database", ENV_CREDENTIAL_STORE, raw),
            }
        }
        config
    }
}
