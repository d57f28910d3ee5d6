use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::database::{self, queries, SharedConnection};
use crate::error::{BriefError, Result};
use crate::models::*;
use crate::services::cache::{CacheLookup, CacheManager, LookupOrigin};
use crate::services::calendar::{self, CalendarAdapter};
use crate::services::email::EmailAdapter;
use crate::services::github::GitHubAdapter;
use crate::services::settings_store::SettingsStore;
use crate::utils::config::BriefConfig;
use crate::utils::hash_string;

pub const GITHUB_CACHE_KEY: &str = "github";
pub const EMAIL_CACHE_KEY: &str = "email";
pub const CALENDAR_CACHE_PREFIX: &str = "calendar:";

/// Cache key of one calendar location on one local day.
pub fn calendar_cache_key(location: &str, day: NaiveDate) -> String {
    format!(
        "{}{:016x}:{}",
        CALENDAR_CACHE_PREFIX,
        hash_string(location),
        day.format("%Y-%m-%d")
    )
}

fn cache_prefix(source: BriefSource) -> &'static str {
    match source {
        BriefSource::Github => GITHUB_CACHE_KEY,
        BriefSource::Calendar => CALENDAR_CACHE_PREFIX,
        BriefSource::Email => EMAIL_CACHE_KEY,
    }
}

/// What one GitHub fetch produces: the brief and the account it was fetched
/// for. Cached and persisted as a unit so the username never outlives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GitHubFetch {
    login: String,
    brief: GitHubBrief,
}

/// One section of a brief together with how it was obtained.
struct Section<T> {
    value: Option<T>,
    status: SourceStatus,
}

impl<T> Section<T> {
    fn not_configured() -> Self {
        Self {
            value: None,
            status: SourceStatus::not_configured(),
        }
    }

    fn failed(error: BriefError) -> Self {
        Self {
            value: None,
            status: SourceStatus {
                state: SourceState::Error,
                error: Some(error.to_string()),
                fetched_at: None,
            },
        }
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> Section<U> {
        Section {
            value: self.value.map(f),
            status: self.status,
        }
    }

    fn from_lookup(lookup: CacheLookup<T>) -> Self {
        let state = match (&lookup.value, &lookup.error) {
            (Some(_), None) => SourceState::Ok,
            (Some(_), Some(_)) => SourceState::Stale,
            (None, _) => SourceState::Error,
        };
        Self {
            status: SourceStatus {
                state,
                error: lookup.error.map(|e| e.to_string()),
                fetched_at: lookup.fetched_at.map(|at| at.timestamp()),
            },
            value: lookup.value,
        }
    }
}

/// Fans out to every configured source through the cache and merges the
/// results into one [`BriefSnapshot`].
pub struct BriefAggregator {
    cache: CacheManager,
    settings: Arc<SettingsStore>,
    github: Arc<GitHubAdapter>,
    calendar: Arc<CalendarAdapter>,
    email: Arc<EmailAdapter>,
    config: BriefConfig,
}

impl BriefAggregator {
    pub fn new(cache: CacheManager, settings: Arc<SettingsStore>, config: BriefConfig) -> Result<Self> {
        let github = GitHubAdapter::new(config.github_api_url.clone(), config.retry.clone())?;
        let calendar = CalendarAdapter::new(config.source_timeout)?;
        Ok(Self {
            cache,
            settings,
            github: Arc::new(github),
            calendar: Arc::new(calendar),
            email: Arc::new(EmailAdapter::new()),
            config,
        })
    }

    pub fn github(&self) -> &GitHubAdapter {
        &self.github
    }

    pub fn config(&self) -> &BriefConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Cached sections where fresh, fetched otherwise.
    pub async fn get_brief(&self) -> BriefSnapshot {
        self.build(false).await
    }

    /// Refetches every configured source, ignoring freshness.
    pub async fn refresh_brief(&self) -> BriefSnapshot {
        self.build(true).await
    }

    async fn build(&self, force: bool) -> BriefSnapshot {
        let (github, calendar, email) = tokio::join!(
            self.github_section(force),
            self.calendar_section(force),
            self.email_section(force),
        );
        let generated_at = Utc::now().timestamp();

        let errors = [
            (BriefSource::Github, &github.status),
            (BriefSource::Calendar, &calendar.status),
            (BriefSource::Email, &email.status),
        ]
        .into_iter()
        .filter_map(|(source, status)| {
            status.error.as_ref().map(|message| SourceError {
                source,
                message: message.clone(),
            })
        })
        .collect::<Vec<_>>();

        if !errors.is_empty() {
            log::info!(
                "Brief generated with {} section error(s){}",
                errors.len(),
                if force { " after refresh" } else { "" }
            );
        }

        BriefSnapshot {
            github: github.value,
            calendar: calendar.value.unwrap_or_default(),
            email: email.value.unwrap_or_default(),
            generated_at,
            status: BriefStatus {
                github: github.status,
                calendar: calendar.status,
                email: email.status,
            },
            errors,
        }
    }

    async fn github_section(&self, force: bool) -> Section<GitHubBrief> {
        let token = match self.settings.github_token() {
            Ok(Some(token)) => token,
            Ok(None) => return Section::not_configured(),
            Err(e) => return Section::failed(e),
        };

        let github = Arc::clone(&self.github);
        let fetch = move || async move {
            let user = github.current_user(&token).await?;
            let brief = github.fetch_brief_for(&token, &user.login).await?;
            Ok(GitHubFetch {
                login: user.login,
                brief,
            })
        };
        let settings = Arc::clone(&self.settings);
        let on_store = move |fetched: &GitHubFetch| {
            if let Err(e) = settings.set_github_username(&fetched.login) {
                log::warn!("Could not remember GitHub username: {}", e);
            }
            persist_snapshot(settings.connection(), GITHUB_CACHE_KEY, BriefSource::Github, fetched);
        };

        let mut section = self
            .lookup(BriefSource::Github, GITHUB_CACHE_KEY, self.config.github_ttl, force, fetch, on_store)
            .await
            .map(|fetched| fetched.brief);

        if let Some(brief) = &section.value {
            if section.status.state == SourceState::Ok && brief.is_partial() {
                let failed: Vec<&str> = brief.query_errors.iter().map(|e| e.query.label()).collect();
                section.status.state = SourceState::Partial;
                section.status.error = Some(format!("some GitHub queries failed: {}", failed.join(", ")));
            }
        }
        section
    }

    async fn calendar_section(&self, force: bool) -> Section<Vec<CalendarEvent>> {
        let source = match self.settings.calendar_source() {
            Ok(source) => source,
            Err(e) => return Section::failed(e),
        };
        let Some(location) = source.location() else {
            return Section::not_configured();
        };

        let now = Local::now();
        let day = now.date_naive();
        let key = calendar_cache_key(&location, day);

        let adapter = Arc::clone(&self.calendar);
        let fetch = move || async move { adapter.fetch(&source, day).await };
        let conn = self.settings.connection().clone();
        let task_key = key.clone();
        let on_store = move |events: &Vec<CalendarEvent>| {
            persist_snapshot(&conn, &task_key, BriefSource::Calendar, events);
        };

        let mut section = self
            .lookup(BriefSource::Calendar, &key, self.config.calendar_ttl, force, fetch, on_store)
            .await;
        if let Some(events) = section.value.as_mut() {
            calendar::annotate(events, Utc::now().timestamp(), self.config.soon_window);
        }
        section
    }

    async fn email_section(&self, force: bool) -> Section<Vec<EmailHeader>> {
        let config = match self.settings.email_config() {
            Ok(config) => config,
            Err(e) => return Section::failed(e),
        };

        let adapter = Arc::clone(&self.email);
        let fetch = move || async move { adapter.fetch(&config).await };
        let conn = self.settings.connection().clone();
        let on_store = move |headers: &Vec<EmailHeader>| {
            persist_snapshot(&conn, EMAIL_CACHE_KEY, BriefSource::Email, headers);
        };

        self.lookup(BriefSource::Email, EMAIL_CACHE_KEY, self.config.email_ttl, force, fetch, on_store)
            .await
    }

    /// Cache lookup bounded by the per-source timeout. A timed-out fetch keeps
    /// running and still lands in the cache; `on_store` persists it only if
    /// nothing cleared or invalidated the key in the meantime.
    async fn lookup<T, F, Fut, S>(
        &self,
        source: BriefSource,
        key: &str,
        ttl: Duration,
        force: bool,
        fetch: F,
        on_store: S,
    ) -> Section<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        S: FnOnce(&T) + Send + 'static,
    {
        let timeout = self.config.source_timeout;
        let pending = self.cache.get_or_fetch_with(key, ttl, force, fetch, on_store);
        let lookup = match tokio::time::timeout(timeout, pending).await {
            Ok(lookup) => lookup,
            Err(_) => {
                let error = BriefError::timeout(source.as_str(), timeout.as_secs());
                log::warn!("{}", error);
                let previous = self.cache.peek::<T>(key);
                CacheLookup {
                    stale: previous.is_some(),
                    fetched_at: previous.as_ref().map(|(_, at)| *at),
                    value: previous.map(|(value, _)| value),
                    error: Some(error),
                    origin: LookupOrigin::Fetched,
                }
            }
        };
        if lookup.origin == LookupOrigin::Cached {
            log::debug!("Serving {} from cache", source);
        }
        Section::from_lookup(lookup)
    }

    /// Restores last-known-good values persisted by earlier runs. Returns how
    /// many sources were seeded.
    pub fn seed_from_disk(&self) -> Result<usize> {
        let rows = {
            let conn = database::lock(self.settings.connection())?;
            queries::load_cache_snapshots(&conn)?
        };
        let current_calendar_key = self
            .settings
            .calendar_source()
            .ok()
            .and_then(|source| source.location())
            .map(|location| calendar_cache_key(&location, Local::now().date_naive()));

        let mut seeded = 0;
        for row in rows {
            let Some(fetched_at) = DateTime::<Utc>::from_timestamp(row.fetched_at, 0) else {
                continue;
            };
            let ok = match row.source.as_str() {
                "github" => self.seed_row::<GitHubFetch>(&row, fetched_at, self.config.github_ttl),
                "email" => self.seed_row::<Vec<EmailHeader>>(&row, fetched_at, self.config.email_ttl),
                "calendar" if current_calendar_key.as_deref() == Some(row.cache_key.as_str()) => {
                    self.seed_row::<Vec<CalendarEvent>>(&row, fetched_at, self.config.calendar_ttl)
                }
                _ => false,
            };
            if ok {
                seeded += 1;
            }
        }
        log::info!("Restored {} cached source(s) from disk", seeded);
        Ok(seeded)
    }

    fn seed_row<T>(&self, row: &queries::CacheSnapshotRow, fetched_at: DateTime<Utc>, ttl: Duration) -> bool
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        match serde_json::from_str::<T>(&row.payload) {
            Ok(value) => {
                self.cache.seed(&row.cache_key, value, fetched_at, ttl);
                true
            }
            Err(e) => {
                log::warn!("Discarding unreadable {} snapshot: {}", row.source, e);
                false
            }
        }
    }

    /// Forgets a source's cached data in memory and on disk.
    pub fn invalidate(&self, source: BriefSource) -> Result<()> {
        self.cache.invalidate_prefix(cache_prefix(source));
        let conn = database::lock(self.settings.connection())?;
        queries::delete_cache_snapshots(&conn, Some(source.as_str()))?;
        Ok(())
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.cache.clear();
        let conn = database::lock(self.settings.connection())?;
        let removed = queries::delete_cache_snapshots(&conn, None)?;
        log::debug!("Removed {} persisted snapshot(s)", removed);
        Ok(())
    }

    pub fn cache_status(&self) -> CacheStatus {
        let last = |prefix: &str| self.cache.last_fetch(prefix).map(|at| at.timestamp());
        CacheStatus {
            github_last_fetch: last(GITHUB_CACHE_KEY),
            calendar_last_fetch: last(CALENDAR_CACHE_PREFIX),
            email_last_fetch: last(EMAIL_CACHE_KEY),
        }
    }
}

/// Best effort: a failed write only costs the restart fallback.
fn persist_snapshot<T: Serialize>(conn: &SharedConnection, key: &str, source: BriefSource, value: &T) {
    let payload = match serde_json::to_string(value) {
        Ok(payload) => payload,
        Err(e) => {
            log::warn!("Could not encode {} snapshot: {}", source, e);
            return;
        }
    };
    let result = database::lock(conn).and_then(|conn| {
        queries::save_cache_snapshot(&conn, key, source.as_str(), &payload, Utc::now().timestamp())
            .map_err(BriefError::from)
    });
    if let Err(e) = result {
        log::warn!("Could not persist {} snapshot: {}", source, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::credentials::{MemoryCredentialStore, Secret};
    use crate::services::retry::RetryPolicy;
    use serde_json::json;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> Arc<SettingsStore> {
        let conn = database::shared(database::init_in_memory().unwrap());
        Arc::new(SettingsStore::new(conn, Arc::new(MemoryCredentialStore::new())))
    }

    fn config(server: &MockServer) -> BriefConfig {
        BriefConfig {
            github_api_url: server.uri(),
            source_timeout: Duration::from_secs(2),
            retry: RetryPolicy::no_retry(),
            ..BriefConfig::default()
        }
    }

    async fn mount_github(server: &MockServer, user_calls: u64) {
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "login": "octocat", "avatar_url": "", "name": null
            })))
            .expect(user_calls)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/issues"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 0, "items": []
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/notifications"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(server)
            .await;
    }

    fn today_calendar_file() -> tempfile::NamedTempFile {
        let stamp = Local::now().date_naive().format("%Y%m%d");
        let ics = format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:focus\r\nSUMMARY:Focus\r\nDTSTART;VALUE=DATE:{}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
            stamp
        );
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(ics.as_bytes()).unwrap();
        file
    }

    fn use_calendar_file(settings: &SettingsStore, path: &std::path::Path) {
        settings
            .set_calendar_config(&CalendarConfig {
                source_type: CalendarSourceType::IcsFile,
                ics_path: Some(path.to_string_lossy().to_string()),
                ics_url: None,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn unconfigured_sources_are_reported_as_such() {
        let server = MockServer::start().await;
        let aggregator = BriefAggregator::new(CacheManager::new(), settings(), config(&server)).unwrap();

        let brief = aggregator.get_brief().await;

        assert_eq!(brief.github, None);
        assert!(brief.calendar.is_empty());
        assert_eq!(brief.status.github.state, SourceState::NotConfigured);
        assert_eq!(brief.status.calendar.state, SourceState::NotConfigured);
        // Disabled email is an empty inbox, not an error.
        assert_eq!(brief.status.email.state, SourceState::Ok);
        assert!(brief.errors.is_empty());
    }

    #[tokio::test]
    async fn second_brief_within_ttl_does_not_refetch() {
        let server = MockServer::start().await;
        mount_github(&server, 1).await;
        let settings = settings();
        settings.set_github_token(&Secret::new("ghp_test")).unwrap();
        let calendar = today_calendar_file();
        use_calendar_file(&settings, calendar.path());

        let aggregator = BriefAggregator::new(CacheManager::new(), settings.clone(), config(&server)).unwrap();
        let first = aggregator.get_brief().await;
        let second = aggregator.get_brief().await;

        assert_eq!(first.status.github.state, SourceState::Ok);
        assert_eq!(second.status.github.fetched_at, first.status.github.fetched_at);
        assert_eq!(second.calendar.len(), 1);
        assert!(second.calendar[0].all_day);
        assert_eq!(
            settings.get_setting(KEY_GITHUB_USERNAME).unwrap().as_deref(),
            Some("octocat")
        );
        // `expect(1)` on /user is verified when the server drops.
    }

    #[tokio::test]
    async fn failing_calendar_does_not_affect_github() {
        let server = MockServer::start().await;
        mount_github(&server, 1).await;
        let settings = settings();
        settings.set_github_token(&Secret::new("ghp_test")).unwrap();
        use_calendar_file(&settings, std::path::Path::new("/no/such/calendar.ics"));

        let aggregator = BriefAggregator::new(CacheManager::new(), settings, config(&server)).unwrap();
        let brief = aggregator.refresh_brief().await;

        assert!(brief.github.is_some());
        assert_eq!(brief.status.github.state, SourceState::Ok);
        assert_eq!(brief.status.calendar.state, SourceState::Error);
        assert!(brief.generated_at > 0);
        assert_eq!(brief.errors.len(), 1);
        assert_eq!(brief.errors[0].source, BriefSource::Calendar);
    }

    #[tokio::test]
    async fn refresh_failure_keeps_last_known_good() {
        let server = MockServer::start().await;
        mount_github(&server, 1).await;
        let settings = settings();
        settings.set_github_token(&Secret::new("ghp_test")).unwrap();
        let aggregator = BriefAggregator::new(CacheManager::new(), settings, config(&server)).unwrap();

        let first = aggregator.get_brief().await;
        assert_eq!(first.status.github.state, SourceState::Ok);

        server.reset().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let refreshed = aggregator.refresh_brief().await;
        assert_eq!(refreshed.status.github.state, SourceState::Stale);
        assert_eq!(refreshed.github, first.github);
        assert!(refreshed.status.github.error.as_deref().unwrap().contains("authentication"));
        assert!(refreshed.generated_at >= first.generated_at);
    }

    #[tokio::test]
    async fn slow_source_times_out_without_blocking_the_brief() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;
        let settings = settings();
        settings.set_github_token(&Secret::new("ghp_test")).unwrap();
        let aggregator = BriefAggregator::new(
            CacheManager::new(),
            settings,
            BriefConfig {
                source_timeout: Duration::from_secs(1),
                ..config(&server)
            },
        )
        .unwrap();

        let started = std::time::Instant::now();
        let brief = aggregator.refresh_brief().await;

        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(brief.status.github.state, SourceState::Error);
        assert!(brief.status.github.error.as_deref().unwrap().contains("did not respond"));
        // The fetch is still running on its own task.
        assert!(aggregator.cache().is_in_flight(GITHUB_CACHE_KEY));
    }

    #[tokio::test]
    async fn clear_cache_forces_a_new_fetch() {
        let server = MockServer::start().await;
        mount_github(&server, 2).await;
        let settings = settings();
        settings.set_github_token(&Secret::new("ghp_test")).unwrap();
        let aggregator = BriefAggregator::new(CacheManager::new(), settings, config(&server)).unwrap();

        aggregator.get_brief().await;
        assert!(aggregator.cache_status().github_last_fetch.is_some());

        aggregator.clear_cache().unwrap();
        assert_eq!(aggregator.cache_status(), CacheStatus::default());

        let brief = aggregator.get_brief().await;
        assert_eq!(brief.status.github.state, SourceState::Ok);
    }

    #[tokio::test]
    async fn snapshots_survive_a_restart() {
        let server = MockServer::start().await;
        mount_github(&server, 1).await;
        let settings = settings();
        settings.set_github_token(&Secret::new("ghp_test")).unwrap();

        let first = BriefAggregator::new(CacheManager::new(), settings.clone(), config(&server)).unwrap();
        let brief = first.get_brief().await;

        let restarted = BriefAggregator::new(CacheManager::new(), settings, config(&server)).unwrap();
        assert_eq!(restarted.seed_from_disk().unwrap(), 2);
        let restored = restarted.get_brief().await;
        assert_eq!(restored.github, brief.github);
        assert_eq!(restored.status.github.state, SourceState::Ok);
    }

    #[tokio::test]
    async fn fetch_finishing_after_clear_cache_is_not_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "login": "octocat", "avatar_url": "", "name": null }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;
        mount_github(&server, 0).await;
        let settings = settings();
        settings.set_github_token(&Secret::new("ghp_test")).unwrap();
        let aggregator = BriefAggregator::new(
            CacheManager::new(),
            settings.clone(),
            BriefConfig {
                source_timeout: Duration::from_millis(100),
                ..config(&server)
            },
        )
        .unwrap();

        let brief = aggregator.get_brief().await;
        assert_eq!(brief.status.github.state, SourceState::Error);
        assert!(aggregator.cache().is_in_flight(GITHUB_CACHE_KEY));

        aggregator.clear_cache().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let restarted = BriefAggregator::new(CacheManager::new(), settings.clone(), config(&server)).unwrap();
        assert_eq!(restarted.seed_from_disk().unwrap(), 0);
        assert_eq!(settings.get_setting(KEY_GITHUB_USERNAME).unwrap(), None);
    }

    #[tokio::test]
    async fn failing_calendar_is_not_refetched_within_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cal.ics"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        let settings = settings();
        settings
            .set_calendar_config(&CalendarConfig {
                source_type: CalendarSourceType::IcsUrl,
                ics_path: None,
                ics_url: Some(format!("{}/cal.ics", server.uri())),
            })
            .unwrap();
        let aggregator = BriefAggregator::new(CacheManager::new(), settings, config(&server)).unwrap();

        let first = aggregator.get_brief().await;
        let second = aggregator.get_brief().await;

        assert_eq!(first.status.calendar.state, SourceState::Error);
        assert_eq!(second.status.calendar.state, SourceState::Error);
        assert_eq!(second.status.calendar.error, first.status.calendar.error);
        assert_eq!(aggregator.cache_status().calendar_last_fetch, None);
    }

    #[test]
    fn calendar_keys_change_with_location_and_day() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let key = calendar_cache_key("https://a/cal.ics", day);
        assert!(key.starts_with(CALENDAR_CACHE_PREFIX));
        assert!(key.ends_with(":2024-03-15"));
        assert_ne!(key, calendar_cache_key("https://b/cal.ics", day));
        assert_ne!(key, calendar_cache_key("https://a/cal.ics", day.succ_opt().unwrap()));
    }
}
