use std::path::{Path, PathBuf};
use std::sync::Arc;

use zeroize::Zeroize;

use crate::database::{self, SharedConnection};
use crate::error::{self, BriefError};
use crate::models::*;
use crate::services::aggregator::BriefAggregator;
use crate::services::cache::CacheManager;
use crate::services::calendar;
use crate::services::credentials::{
    CredentialStore, KeyringCredentialStore, Secret, SqliteCredentialStore, KEYCHAIN_SERVICE,
};
use crate::services::settings_store::SettingsStore;
use crate::utils::config::{BriefConfig, CredentialBackend};

/// Version of the command names and payload shapes below. Bumped on any
/// breaking change the UI has to follow.
pub const COMMAND_SCHEMA_VERSION: u32 = 1;

/// The backend operations the UI can invoke.
///
/// Each method returns `Result<T, String>` so it can be handed to the UI as
/// is; the error string never contains a credential.
pub struct CommandDispatcher {
    settings: Arc<SettingsStore>,
    aggregator: BriefAggregator,
}

impl CommandDispatcher {
    /// Opens (or creates) the database under `data_dir` and restores cached
    /// snapshots from the previous run.
    pub fn open(data_dir: &Path, config: BriefConfig) -> error::Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(database::DB_FILE_NAME);
        let conn = database::init_database(&db_path)?;
        log::info!("Database ready at {}", db_path.display());

        let shared = database::shared(conn);
        let credentials = credential_store(config.credential_store, &shared);
        Self::from_parts(shared, credentials, config)
    }

    fn from_parts(
        conn: SharedConnection,
        credentials: Arc<dyn CredentialStore>,
        config: BriefConfig,
    ) -> error::Result<Self> {
        let settings = Arc::new(SettingsStore::new(conn, credentials));
        let aggregator = BriefAggregator::new(CacheManager::new(), settings.clone(), config)?;
        if let Err(e) = aggregator.seed_from_disk() {
            log::warn!("Could not restore cached briefs: {}", e);
        }
        Ok(Self { settings, aggregator })
    }

    pub async fn get_brief(&self) -> Result<BriefSnapshot, String> {
        Ok(self.aggregator.get_brief().await)
    }

    pub async fn refresh_brief(&self) -> Result<BriefSnapshot, String> {
        Ok(self.aggregator.refresh_brief().await)
    }

    pub async fn validate_github_token(&self, token: String) -> Result<GitHubUser, String> {
        let token = take_secret(token);
        if token.is_blank() {
            return Err(BriefError::Config("GitHub token must not be empty".to_string()).to_string());
        }
        let user = self
            .aggregator
            .github()
            .validate_token(&token)
            .await
            .map_err(|e| e.to_string())?;
        self.settings
            .set_github_username(&user.login)
            .map_err(|e| e.to_string())?;
        Ok(user)
    }

    pub async fn save_github_token(&self, token: String) -> Result<(), String> {
        let token = take_secret(token);
        self.settings
            .set_github_token(&token)
            .map_err(|e| e.to_string())?;
        self.aggregator
            .invalidate(BriefSource::Github)
            .map_err(|e| e.to_string())
    }

    pub async fn save_calendar_config(&self, config: CalendarConfig) -> Result<(), String> {
        self.settings
            .set_calendar_config(&config)
            .map_err(|e| e.to_string())?;
        self.aggregator
            .invalidate(BriefSource::Calendar)
            .map_err(|e| e.to_string())
    }

    pub async fn clear_cache(&self) -> Result<(), String> {
        self.aggregator.clear_cache().map_err(|e| e.to_string())
    }

    pub async fn get_setting(&self, key: String) -> Result<Option<String>, String> {
        self.settings.get_setting(&key).map_err(|e| e.to_string())
    }

    pub async fn set_setting(&self, key: String, value: String) -> Result<(), String> {
        self.settings.set_flag(&key, &value).map_err(|e| e.to_string())
    }

    pub async fn get_all_settings(&self) -> Result<AllSettings, String> {
        self.settings.get_all().map_err(|e| e.to_string())
    }

    pub async fn is_onboarding_complete(&self) -> Result<bool, String> {
        match self.settings.is_onboarding_complete() {
            Ok(done) => Ok(done),
            Err(e) => {
                log::warn!("Could not read onboarding flag, assuming incomplete: {}", e);
                Ok(false)
            }
        }
    }

    pub async fn get_cache_status(&self) -> Result<CacheStatus, String> {
        Ok(self.aggregator.cache_status())
    }

    /// Parses a local ICS file for today without touching the saved config.
    pub async fn parse_ics_file(&self, path: String) -> Result<Vec<CalendarEvent>, String> {
        let path = PathBuf::from(path.trim());
        calendar::preview_file(&path, self.aggregator.config().soon_window)
            .await
            .map_err(|e| e.to_string())
    }

    /// Drops in-memory cache state; fetches still running are not stored.
    pub fn shutdown(&self) {
        self.aggregator.cache().clear();
        log::info!("Brief backend shut down");
    }
}

fn credential_store(backend: CredentialBackend, conn: &SharedConnection) -> Arc<dyn CredentialStore> {
    if backend == CredentialBackend::Keychain {
        let keychain = KeyringCredentialStore::new(KEYCHAIN_SERVICE);
        if keychain.is_available() {
            log::info!("Credentials kept in the OS keychain");
            return Arc::new(keychain);
        }
        log::warn!("Falling back to the local database for credentials");
    }
    Arc::new(SqliteCredentialStore::new(conn.clone()))
}

/// Moves a token received from the UI into a [`Secret`], wiping the original.
fn take_secret(mut raw: String) -> Secret {
    let secret = Secret::new(raw.trim());
    raw.zeroize();
    secret
}
