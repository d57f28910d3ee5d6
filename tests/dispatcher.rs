use std::io::Write;
use std::time::Duration;

use chrono::Local;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wtftoday::models::{CalendarConfig, CalendarSourceType, SourceState};
use wtftoday::services::retry::RetryPolicy;
use wtftoday::utils::config::{BriefConfig, CredentialBackend};
use wtftoday::{CommandDispatcher, COMMAND_SCHEMA_VERSION};

fn config(server: &MockServer) -> BriefConfig {
    BriefConfig {
        github_api_url: server.uri(),
        source_timeout: Duration::from_secs(3),
        retry: RetryPolicy::no_retry(),
        credential_store: CredentialBackend::Database,
        ..BriefConfig::default()
    }
}

async fn mount_github(server: &MockServer, user_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/user"))
        .and(header("authorization", "Bearer ghp_valid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "login": "octocat",
            "avatar_url": "https://avatars.example/octocat",
            "name": "The Octocat"
        })))
        .expect(user_calls)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "message": "Bad credentials"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 1,
            "items": [{
                "id": 11,
                "number": 4,
                "title": "Fix the widget",
                "state": "open",
                "user": { "login": "hubot", "avatar_url": "" },
                "html_url": "https://github.com/acme/widgets/pull/4",
                "repository_url": "https://api.github.com/repos/acme/widgets",
                "body": null,
                "labels": [],
                "created_at": "2024-03-01T10:00:00Z",
                "updated_at": "2024-03-02T10:00:00Z",
                "pull_request": { "url": "x" }
            }]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/pulls/4/reviews"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/notifications"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

fn ics_for_today() -> tempfile::NamedTempFile {
    ics_file_with("offsite", "Team offsite")
}

fn ics_file_with(uid: &str, summary: &str) -> tempfile::NamedTempFile {
    let stamp = Local::now().date_naive().format("%Y%m%d");
    let ics = format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:{}\r\nSUMMARY:{}\r\nDTSTART;VALUE=DATE:{}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
        uid, summary, stamp
    );
    let mut file = tempfile::Builder::new().suffix(".ics").tempfile().unwrap();
    file.write_all(ics.as_bytes()).unwrap();
    file
}

#[test]
fn schema_version_is_published() {
    assert_eq!(COMMAND_SCHEMA_VERSION, 1);
}

#[tokio::test]
async fn fresh_install_reports_defaults() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = CommandDispatcher::open(dir.path(), config(&server)).unwrap();

    assert!(!dispatcher.is_onboarding_complete().await.unwrap());
    let settings = dispatcher.get_all_settings().await.unwrap();
    assert!(!settings.github_configured);
    assert_eq!(settings.calendar_config.source_type, CalendarSourceType::None);

    dispatcher
        .set_setting("onboarding_complete".to_string(), "true".to_string())
        .await
        .unwrap();
    assert!(dispatcher.is_onboarding_complete().await.unwrap());
    assert_eq!(
        dispatcher.get_setting("onboarding_complete".to_string()).await.unwrap().as_deref(),
        Some("true")
    );
    assert!(dispatcher.set_setting(" ".to_string(), "x".to_string()).await.is_err());

    let brief = dispatcher.get_brief().await.unwrap();
    assert_eq!(brief.status.github.state, SourceState::NotConfigured);
    assert_eq!(brief.status.calendar.state, SourceState::NotConfigured);
}

#[tokio::test]
async fn token_validation_and_save() {
    let server = MockServer::start().await;
    mount_github(&server, 1).await;
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = CommandDispatcher::open(dir.path(), config(&server)).unwrap();

    let err = dispatcher
        .validate_github_token("ghp_wrong".to_string())
        .await
        .unwrap_err();
    assert!(err.contains("authentication failed"));
    assert!(!err.contains("ghp_wrong"));

    let user = dispatcher
        .validate_github_token("  ghp_valid\n".to_string())
        .await
        .unwrap();
    assert_eq!(user.login, "octocat");

    assert!(dispatcher.save_github_token("   ".to_string()).await.is_err());
    dispatcher.save_github_token("ghp_valid".to_string()).await.unwrap();

    let settings = dispatcher.get_all_settings().await.unwrap();
    assert!(settings.github_configured);
    assert_eq!(settings.github_username.as_deref(), Some("octocat"));
}

#[tokio::test]
async fn brief_merges_github_and_calendar() {
    let server = MockServer::start().await;
    mount_github(&server, 1).await;
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = CommandDispatcher::open(dir.path(), config(&server)).unwrap();
    let calendar = ics_for_today();

    dispatcher.save_github_token("ghp_valid".to_string()).await.unwrap();
    dispatcher
        .save_calendar_config(CalendarConfig {
            source_type: CalendarSourceType::IcsFile,
            ics_path: Some(calendar.path().to_string_lossy().to_string()),
            ics_url: None,
        })
        .await
        .unwrap();

    let brief = dispatcher.get_brief().await.unwrap();
    let github = brief.github.as_ref().unwrap();
    assert_eq!(github.prs_to_review.len(), 1);
    assert_eq!(github.my_open_prs[0].review_status, None);
    assert!(github.mentioned_issues.is_empty());
    assert_eq!(brief.calendar.len(), 1);
    assert!(brief.calendar[0].all_day);
    assert_eq!(brief.status.calendar.state, SourceState::Ok);
    assert!(brief.errors.is_empty());

    // Within the TTL nothing is fetched again; `expect(1)` checks it.
    let again = dispatcher.get_brief().await.unwrap();
    assert_eq!(again.github, brief.github);
    assert!(again.generated_at >= brief.generated_at);

    let status = dispatcher.get_cache_status().await.unwrap();
    assert!(status.github_last_fetch.is_some());
    assert!(status.calendar_last_fetch.is_some());
}

#[tokio::test]
async fn invalid_calendar_config_is_rejected() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = CommandDispatcher::open(dir.path(), config(&server)).unwrap();

    let err = dispatcher
        .save_calendar_config(CalendarConfig {
            source_type: CalendarSourceType::IcsUrl,
            ics_path: None,
            ics_url: Some("ftp://example.com/cal.ics".to_string()),
        })
        .await
        .unwrap_err();
    assert!(err.contains("configuration error"));
    assert_eq!(
        dispatcher.get_all_settings().await.unwrap().calendar_config,
        CalendarConfig::default()
    );
}

#[tokio::test]
async fn clear_cache_then_get_brief_fetches_again() {
    let server = MockServer::start().await;
    mount_github(&server, 2).await;
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = CommandDispatcher::open(dir.path(), config(&server)).unwrap();
    dispatcher.save_github_token("ghp_valid".to_string()).await.unwrap();

    dispatcher.get_brief().await.unwrap();
    dispatcher.clear_cache().await.unwrap();
    assert_eq!(dispatcher.get_cache_status().await.unwrap().github_last_fetch, None);

    let brief = dispatcher.get_brief().await.unwrap();
    assert_eq!(brief.status.github.state, SourceState::Ok);
}

#[tokio::test]
async fn settings_and_snapshots_survive_reopening() {
    let server = MockServer::start().await;
    mount_github(&server, 1).await;
    let dir = tempfile::tempdir().unwrap();

    let first_brief = {
        let dispatcher = CommandDispatcher::open(dir.path(), config(&server)).unwrap();
        dispatcher.save_github_token("ghp_valid".to_string()).await.unwrap();
        let brief = dispatcher.get_brief().await.unwrap();
        dispatcher.shutdown();
        brief
    };

    let reopened = CommandDispatcher::open(dir.path(), config(&server)).unwrap();
    assert!(reopened.get_all_settings().await.unwrap().github_configured);
    assert!(reopened.get_cache_status().await.unwrap().github_last_fetch.is_some());

    let brief = reopened.get_brief().await.unwrap();
    assert_eq!(brief.github, first_brief.github);
}

#[tokio::test]
async fn parse_ics_file_previews_without_saving() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = CommandDispatcher::open(dir.path(), config(&server)).unwrap();
    let calendar = ics_for_today();

    let events = dispatcher
        .parse_ics_file(calendar.path().to_string_lossy().to_string())
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].summary, "Team offsite");
    assert_eq!(
        dispatcher.get_all_settings().await.unwrap().calendar_config.source_type,
        CalendarSourceType::None
    );

    let err = dispatcher
        .parse_ics_file(dir.path().join("missing.ics").to_string_lossy().to_string())
        .await
        .unwrap_err();
    assert!(err.contains("failed to read calendar file"));
}

fn file_config(file: &tempfile::NamedTempFile) -> CalendarConfig {
    CalendarConfig {
        source_type: CalendarSourceType::IcsFile,
        ics_path: Some(file.path().to_string_lossy().to_string()),
        ics_url: None,
    }
}

#[tokio::test]
async fn saving_a_calendar_config_drops_the_cached_calendar() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = CommandDispatcher::open(dir.path(), config(&server)).unwrap();
    let standup = ics_file_with("standup", "Standup");
    let review = ics_file_with("review", "Design review");

    dispatcher.save_calendar_config(file_config(&standup)).await.unwrap();
    let before = dispatcher.get_brief().await.unwrap();
    assert_eq!(before.calendar[0].summary, "Standup");

    dispatcher.save_calendar_config(file_config(&review)).await.unwrap();
    let after = dispatcher.get_brief().await.unwrap();
    assert_eq!(after.calendar.len(), 1);
    assert_eq!(after.calendar[0].summary, "Design review");
}

#[tokio::test]
async fn saving_a_calendar_config_for_the_same_file_rereads_it() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = CommandDispatcher::open(dir.path(), config(&server)).unwrap();
    let calendar = ics_file_with("standup", "Standup");

    dispatcher.save_calendar_config(file_config(&calendar)).await.unwrap();
    assert_eq!(dispatcher.get_brief().await.unwrap().calendar[0].summary, "Standup");

    let stamp = Local::now().date_naive().format("%Y%m%d");
    let updated = format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:standup\r\nSUMMARY:Standup (moved)\r\nDTSTART;VALUE=DATE:{}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
        stamp
    );
    std::fs::write(calendar.path(), updated).unwrap();
    // Within the TTL the old expansion is still served.
    assert_eq!(dispatcher.get_brief().await.unwrap().calendar[0].summary, "Standup");

    dispatcher.save_calendar_config(file_config(&calendar)).await.unwrap();
    assert_eq!(
        dispatcher.get_brief().await.unwrap().calendar[0].summary,
        "Standup (moved)"
    );
}

#[tokio::test]
async fn saving_a_token_drops_the_cached_github_brief() {
    let server = MockServer::start().await;
    mount_github(&server, 2).await;
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = CommandDispatcher::open(dir.path(), config(&server)).unwrap();

    dispatcher.save_github_token("ghp_valid".to_string()).await.unwrap();
    let first = dispatcher.get_brief().await.unwrap();
    assert_eq!(first.status.github.state, SourceState::Ok);

    dispatcher.save_github_token("ghp_valid".to_string()).await.unwrap();
    assert_eq!(dispatcher.get_cache_status().await.unwrap().github_last_fetch, None);
    let second = dispatcher.get_brief().await.unwrap();
    assert_eq!(second.status.github.state, SourceState::Ok);
    // `expect(2)` on /user proves the second brief fetched again.
}
