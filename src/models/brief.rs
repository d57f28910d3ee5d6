use std::fmt;

use serde::{Deserialize, Serialize};

use super::{CalendarEvent, EmailHeader, GitHubBrief};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BriefSource {
    Github,
    Calendar,
    Email,
}

impl BriefSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BriefSource::Github => "github",
            BriefSource::Calendar => "calendar",
            BriefSource::Email => "email",
        }
    }
}

impl fmt::Display for BriefSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a section of the brief should be rendered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    /// No configuration for this source; nothing was fetched.
    NotConfigured,
    /// Fresh data (possibly legitimately empty).
    Ok,
    /// Fresh data, but some sub-queries failed.
    Partial,
    /// The latest fetch failed; the data is the last-known-good value.
    Stale,
    /// The fetch failed and there is nothing cached to fall back on.
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceStatus {
    pub state: SourceState,
    pub error: Option<String>,
    pub fetched_at: Option<i64>,
}

impl SourceStatus {
    pub fn not_configured() -> Self {
        Self {
            state: SourceState::NotConfigured,
            error: None,
            fetched_at: None,
        }
    }
}

impl Default for SourceStatus {
    fn default() -> Self {
        Self::not_configured()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BriefStatus {
    pub github: SourceStatus,
    pub calendar: SourceStatus,
    pub email: SourceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceError {
    pub source: BriefSource,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BriefSnapshot {
    pub github: Option<GitHubBrief>,
    pub calendar: Vec<CalendarEvent>,
    pub email: Vec<EmailHeader>,
    /// Unix seconds at which the merge of all sources completed.
    pub generated_at: i64,
    pub status: BriefStatus,
    pub errors: Vec<SourceError>,
}
