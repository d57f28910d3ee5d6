use std::sync::Arc;

use crate::database::{self, queries, SharedConnection};
use crate::error::{BriefError, Result};
use crate::models::*;
use crate::services::credentials::{CredentialStore, Secret};

/// Durable per-source configuration, credentials and UI flags.
///
/// Every write goes straight to SQLite before returning; reads never touch the
/// network.
pub struct SettingsStore {
    conn: SharedConnection,
    credentials: Arc<dyn CredentialStore>,
}

impl SettingsStore {
    pub fn new(conn: SharedConnection, credentials: Arc<dyn CredentialStore>) -> Self {
        Self { conn, credentials }
    }

    pub fn connection(&self) -> &SharedConnection {
        &self.conn
    }

    pub fn get_all(&self) -> Result<AllSettings> {
        let github_configured = self.github_token()?.is_some();
        let github_username = if github_configured {
            self.get_setting(KEY_GITHUB_USERNAME)?
        } else {
            None
        };

        Ok(AllSettings {
            github_configured,
            github_username,
            calendar_config: self.calendar_config()?,
            email_config: self.email_config()?,
            onboarding_complete: self.is_onboarding_complete()?,
        })
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = database::lock(&self.conn)?;
        Ok(queries::get_setting(&conn, key)?)
    }

    pub fn set_flag(&self, key: &str, value: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(BriefError::Config("setting key must not be empty".to_string()));
        }
        let conn = database::lock(&self.conn)?;
        queries::set_setting(&conn, key, value)?;
        log::debug!("Setting '{}' updated", key);
        Ok(())
    }

    pub fn is_onboarding_complete(&self) -> Result<bool> {
        Ok(self
            .get_setting(KEY_ONBOARDING_COMPLETE)?
            .map(|v| v == "true")
            .unwrap_or(false))
    }

    pub fn github_token(&self) -> Result<Option<Secret>> {
        self.credentials.get(CREDENTIAL_GITHUB_TOKEN)
    }

    pub fn set_github_token(&self, token: &Secret) -> Result<()> {
        if token.is_blank() {
            return Err(BriefError::Config("GitHub token must not be empty".to_string()));
        }
        self.credentials.set(CREDENTIAL_GITHUB_TOKEN, token)?;
        log::info!("GitHub token saved");
        Ok(())
    }

    pub fn set_github_username(&self, login: &str) -> Result<()> {
        self.set_flag(KEY_GITHUB_USERNAME, login)
    }

    pub fn calendar_config(&self) -> Result<CalendarConfig> {
        Ok(self
            .get_setting(KEY_CALENDAR_CONFIG)?
            .and_then(|json| match serde_json::from_str(&json) {
                Ok(config) => Some(config),
                Err(e) => {
                    log::warn!("Ignoring unreadable calendar config: {}", e);
                    None
                }
            })
            .unwrap_or_default())
    }

    pub fn calendar_source(&self) -> Result<CalendarSource> {
        CalendarSource::try_from(&self.calendar_config()?)
    }

    /// Validates and stores the calendar configuration, returning the active
    /// source.
    pub fn set_calendar_config(&self, config: &CalendarConfig) -> Result<CalendarSource> {
        let source = CalendarSource::try_from(config)?;
        let json = serde_json::to_string(config)
            .map_err(|e| BriefError::Storage(format!("failed to encode calendar config: {}", e)))?;
        let conn = database::lock(&self.conn)?;
        queries::set_setting(&conn, KEY_CALENDAR_CONFIG, &json)?;
        log::info!("Calendar source set to {:?}", config.source_type);
        Ok(source)
    }

    pub fn email_config(&self) -> Result<EmailConfig> {
        Ok(self
            .get_setting(KEY_EMAIL_CONFIG)?
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default())
    }

    /// Removes every setting and credential.
    pub fn clear(&self) -> Result<()> {
        self.credentials.clear(CREDENTIAL_GITHUB_TOKEN)?;
        let mut conn = database::lock(&self.conn)?;
        queries::clear_settings_and_credentials(&mut conn)?;
        log::info!("All settings cleared");
        Ok(())
    }
}
