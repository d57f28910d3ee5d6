use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::BriefError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start_time: i64,
    pub end_time: i64,
    pub all_day: bool,
    pub html_link: Option<String>,
    pub is_now: bool,
    pub is_soon: bool,
}

/// Calendar configuration as the UI sends and receives it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarConfig {
    pub source_type: CalendarSourceType,
    #[serde(default)]
    pub ics_path: Option<String>,
    #[serde(default)]
    pub ics_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CalendarSourceType {
    #[serde(rename = "ics_file", alias = "file")]
    IcsFile,
    #[serde(rename = "ics_url", alias = "url")]
    IcsUrl,
    #[serde(rename = "none")]
    None,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            source_type: CalendarSourceType::None,
            ics_path: None,
            ics_url: None,
        }
    }
}

/// Validated calendar source; exactly one variant is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarSource {
    None,
    Url(String),
    File(PathBuf),
}

impl CalendarSource {
    /// Stable identifier of where the events come from, used in cache keys.
    pub fn location(&self) -> Option<String> {
        match self {
            CalendarSource::None => None,
            CalendarSource::Url(url) => Some(url.clone()),
            CalendarSource::File(path) => Some(path.to_string_lossy().to_string()),
        }
    }

    pub fn is_configured(&self) -> bool {
        !matches!(self, CalendarSource::None)
    }
}

impl TryFrom<&CalendarConfig> for CalendarSource {
    type Error = BriefError;

    fn try_from(config: &CalendarConfig) -> Result<Self, Self::Error> {
        let non_blank = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        match config.source_type {
            CalendarSourceType::None => Ok(CalendarSource::None),
            CalendarSourceType::IcsUrl => {
                let url = non_blank(&config.ics_url).ok_or_else(|| {
                    BriefError::Config("Calendar URL not configured".to_string())
                })?;
                let lower = url.to_lowercase();
                if lower.starts_with("webcal://") {
                    return Ok(CalendarSource::Url(format!(
                        "https://{}",
                        &url["webcal://".len()..]
                    )));
                }
                if !(lower.starts_with("http://") || lower.starts_with("https://")) {
                    return Err(BriefError::Config(format!(
                        "Calendar URL must use http, https or webcal: {}",
                        url
                    )));
                }
                Ok(CalendarSource::Url(url))
            }
            CalendarSourceType::IcsFile => {
                let path = non_blank(&config.ics_path).ok_or_else(|| {
                    BriefError::Config("Calendar file path not configured".to_string())
                })?;
                Ok(CalendarSource::File(PathBuf::from(path)))
            }
        }
    }
}
