use serde::{Deserialize, Serialize};

use super::{CalendarConfig, EmailConfig};

pub const KEY_ONBOARDING_COMPLETE: &str = "onboarding_complete";
pub const KEY_GITHUB_USERNAME: &str = "github_username";
pub const KEY_CALENDAR_CONFIG: &str = "calendar_config";
pub const KEY_EMAIL_CONFIG: &str = "email_config";

/// Credential name of the GitHub personal access token.
pub const CREDENTIAL_GITHUB_TOKEN: &str = "github_token";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AllSettings {
    pub github_configured: bool,
    pub github_username: Option<String>,
    pub calendar_config: CalendarConfig,
    pub email_config: EmailConfig,
    pub onboarding_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheStatus {
    pub github_last_fetch: Option<i64>,
    pub calendar_last_fetch: Option<i64>,
    pub email_last_fetch: Option<i64>,
}
