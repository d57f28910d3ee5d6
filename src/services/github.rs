use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, LINK, RETRY_AFTER, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::error::{BriefError, Result};
use crate::models::*;
use crate::services::credentials::Secret;
use crate::services::retry::RetryPolicy;

pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// Upper bound on items collected per query across all pages.
pub const MAX_ITEMS: usize = 200;
const PAGE_SIZE: usize = 50;
const REVIEW_CONCURRENCY: usize = 4;
const LOW_QUOTA_WARNING: u32 = 10;
const BODY_PREVIEW_CHARS: usize = 200;

/// Rate-limit headers of a GitHub response.
#[derive(Debug, Clone, Default, PartialEq)]
struct RateLimitInfo {
    remaining: Option<u32>,
    reset_at: Option<i64>,
    retry_after: Option<u64>,
}

impl RateLimitInfo {
    fn from_headers(headers: &HeaderMap) -> Self {
        let number = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok())
        };
        Self {
            remaining: number("x-ratelimit-remaining").map(|v| v.max(0) as u32),
            reset_at: number("x-ratelimit-reset"),
            retry_after: headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok()),
        }
    }

    fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// How long until the API accepts requests again, if it told us.
    fn wait(&self, now: i64) -> Option<Duration> {
        if let Some(secs) = self.retry_after {
            return Some(Duration::from_secs(secs));
        }
        self.reset_at
            .map(|reset| Duration::from_secs((reset - now).max(0) as u64 + 1))
    }

    fn retry_at(&self, now: i64) -> Option<i64> {
        self.retry_after
            .map(|secs| now + secs as i64)
            .or(self.reset_at)
    }
}

pub struct GitHubAdapter {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    /// Reset time reported by the last response that used up the quota.
    exhausted_until: Mutex<Option<i64>>,
}

impl GitHubAdapter {
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("WTFToday/1.0"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| BriefError::Config(format!("failed to build GitHub client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
            exhausted_until: Mutex::new(None),
        })
    }

    /// Checks a token by asking GitHub who it belongs to.
    pub async fn validate_token(&self, token: &Secret) -> Result<GitHubUser> {
        self.current_user(token).await
    }

    pub async fn current_user(&self, token: &Secret) -> Result<GitHubUser> {
        let url = self.url("/user")?;
        let response = self.send(token, url).await?;
        let user: ApiUser = response.json().await?;
        Ok(GitHubUser {
            login: user.login,
            avatar_url: user.avatar_url,
            name: user.name,
        })
    }

    pub async fn fetch_brief(&self, token: &Secret) -> Result<GitHubBrief> {
        let user = self.current_user(token).await?;
        self.fetch_brief_for(token, &user.login).await
    }

    /// Runs the four brief queries concurrently for `login`.
    ///
    /// A failing query leaves its list empty and is recorded in
    /// `query_errors`; only when every query fails is the whole fetch an error.
    pub async fn fetch_brief_for(&self, token: &Secret, login: &str) -> Result<GitHubBrief> {
        let (prs_to_review, my_open_prs, mentioned_issues, notifications) = tokio::join!(
            self.prs_to_review(token, login),
            self.my_open_prs(token, login),
            self.mentioned_issues(token, login),
            self.notifications(token),
        );

        let mut failures = Vec::new();
        let prs_to_review = keep_or_record(prs_to_review, GitHubQuery::PrsToReview, &mut failures);
        let my_open_prs = keep_or_record(my_open_prs, GitHubQuery::MyOpenPrs, &mut failures);
        let mentioned_issues =
            keep_or_record(mentioned_issues, GitHubQuery::MentionedIssues, &mut failures);
        let notifications = keep_or_record(notifications, GitHubQuery::Notifications, &mut failures);

        if failures.len() == 4 {
            let (_, err) = failures.swap_remove(0);
            return Err(err);
        }

        let query_errors = failures
            .into_iter()
            .map(|(query, err)| GitHubQueryError {
                query,
                message: err.to_string(),
            })
            .collect();

        Ok(GitHubBrief {
            prs_to_review,
            my_open_prs,
            mentioned_issues,
            notifications,
            last_updated: Some(chrono::Utc::now().timestamp()),
            query_errors,
        })
    }

    pub async fn prs_to_review(&self, token: &Secret, login: &str) -> Result<Vec<GitHubPullRequest>> {
        let query = format!("is:open is:pr review-requested:{} archived:false", login);
        let items = self.search(token, &query).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.pull_request.is_some())
            .map(issue_to_pr)
            .collect())
    }

    pub async fn my_open_prs(&self, token: &Secret, login: &str) -> Result<Vec<GitHubPullRequest>> {
        let query = format!("is:open is:pr author:{} archived:false", login);
        let mut prs: Vec<GitHubPullRequest> = self
            .search(token, &query)
            .await?
            .into_iter()
            .filter(|item| item.pull_request.is_some())
            .map(issue_to_pr)
            .collect();

        let keys: Vec<(String, i64)> = prs
            .iter()
            .map(|pr| (pr.repo_full_name.clone(), pr.number))
            .collect();
        let statuses: Vec<Option<ReviewStatus>> = stream::iter(keys)
            .map(|(repo, number)| async move { self.review_status(token, &repo, number).await })
            .buffered(REVIEW_CONCURRENCY)
            .collect()
            .await;

        for (pr, status) in prs.iter_mut().zip(statuses) {
            pr.review_status = status;
        }
        Ok(prs)
    }

    pub async fn mentioned_issues(&self, token: &Secret, login: &str) -> Result<Vec<GitHubIssue>> {
        let query = format!("is:open mentions:{} archived:false", login);
        let items = self.search(token, &query).await?;
        Ok(items
            .into_iter()
            .filter(|item| item.pull_request.is_none())
            .map(issue_to_issue)
            .collect())
    }

    pub async fn notifications(&self, token: &Secret) -> Result<Vec<GitHubNotification>> {
        let url = Url::parse_with_params(
            &format!("{}/notifications", self.base_url),
            &[("per_page", PAGE_SIZE.to_string())],
        )
        .map_err(|e| BriefError::Config(format!("invalid GitHub API URL: {}", e)))?;

        let notifications = self
            .get_pages::<Vec<ApiNotification>, _>(token, url, |page| page)
            .await?;

        Ok(notifications
            .into_iter()
            .map(|n| GitHubNotification {
                id: n.id,
                repo_full_name: n.repository.full_name,
                subject_title: n.subject.title,
                subject_type: n.subject.subject_type,
                reason: n.reason,
                unread: n.unread,
                updated_at: n.updated_at,
                url: n.subject.url.map(|u| api_url_to_html(&u)),
            })
            .collect())
    }

    async fn review_status(&self, token: &Secret, repo: &str, number: i64) -> Option<ReviewStatus> {
        let url = match self.url(&format!("/repos/{}/pulls/{}/reviews?per_page=100", repo, number)) {
            Ok(url) => url,
            Err(e) => {
                log::warn!("Skipping reviews for {}#{}: {}", repo, number, e);
                return None;
            }
        };
        match self.get_pages::<Vec<ApiReview>, _>(token, url, |page| page).await {
            Ok(reviews) => reduce_review_status(&reviews),
            Err(e) => {
                log::warn!("Failed to load reviews for {}#{}: {}", repo, number, e);
                None
            }
        }
    }

    async fn search(&self, token: &Secret, query: &str) -> Result<Vec<ApiSearchItem>> {
        let url = Url::parse_with_params(
            &format!("{}/search/issues", self.base_url),
            &[
                ("q", query.to_string()),
                ("sort", "updated".to_string()),
                ("order", "desc".to_string()),
                ("per_page", PAGE_SIZE.to_string()),
            ],
        )
        .map_err(|e| BriefError::Config(format!("invalid GitHub API URL: {}", e)))?;

        self.get_pages::<ApiSearchResult<ApiSearchItem>, _>(token, url, |page| page.items)
            .await
    }

    /// Follows `Link: rel="next"` until exhausted or [`MAX_ITEMS`] collected.
    async fn get_pages<P, T>(
        &self,
        token: &Secret,
        first: Url,
        items_of: impl Fn(P) -> Vec<T>,
    ) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut next = Some(first);

        while let Some(url) = next.take() {
            let response = self.send(token, url).await?;
            next = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_next_link)
                .and_then(|link| Url::parse(&link).ok());

            let page: P = response.json().await?;
            items.extend(items_of(page));

            if items.len() >= MAX_ITEMS {
                items.truncate(MAX_ITEMS);
                break;
            }
        }

        Ok(items)
    }

    /// Sends a GET, retrying transport failures, 5xx responses and short
    /// rate-limit windows according to the retry policy.
    async fn send(&self, token: &Secret, url: Url) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.wait_for_quota().await?;
            let outcome = self
                .client
                .get(url.clone())
                .bearer_auth(token.expose())
                .send()
                .await;

            let response = match outcome {
                Ok(response) => response,
                Err(e) => {
                    let err = BriefError::from(e);
                    if self.retry.should_retry(attempt) {
                        let delay = self.retry.delay_for(attempt);
                        log::debug!("GitHub request failed ({}), retrying in {:?}", err, delay);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(err);
                }
            };

            let status = response.status();
            let quota = RateLimitInfo::from_headers(response.headers());
            self.note_quota(&quota);
            if let Some(remaining) = quota.remaining {
                if remaining < LOW_QUOTA_WARNING && status.is_success() {
                    log::warn!("GitHub rate limit nearly exhausted ({} requests left)", remaining);
                }
            }

            if status.is_success() {
                return Ok(response);
            }

            let now = chrono::Utc::now().timestamp();
            let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
                || (status == StatusCode::FORBIDDEN
                    && (quota.is_exhausted() || quota.retry_after.is_some()));

            if rate_limited {
                let delay = match quota.wait(now) {
                    Some(wait) => self.retry.rate_limit_wait(wait),
                    None => Some(self.retry.delay_for(attempt)),
                };
                match delay {
                    Some(delay) if self.retry.should_retry(attempt) => {
                        log::warn!("GitHub rate limit hit, waiting {:?} before retrying", delay);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    _ => {
                        return Err(BriefError::RateLimit {
                            service: "GitHub".to_string(),
                            retry_at: quota.retry_at(now),
                        });
                    }
                }
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(BriefError::Auth(format!(
                    "GitHub rejected the token ({})",
                    status
                )));
            }

            if status.is_server_error() && self.retry.should_retry(attempt) {
                let delay = self.retry.delay_for(attempt);
                log::debug!("GitHub returned {}, retrying in {:?}", status, delay);
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(BriefError::Network(format!("GitHub API returned {}", status)));
        }
    }

    /// Holds the next request back until the quota resets once a response
    /// reported zero requests left. Fails fast when the reset is too far off.
    async fn wait_for_quota(&self) -> Result<()> {
        let reset_at = *self.exhausted_until.lock().unwrap_or_else(|p| p.into_inner());
        let Some(reset_at) = reset_at else {
            return Ok(());
        };
        let now = chrono::Utc::now().timestamp();
        if reset_at < now {
            return Ok(());
        }
        let wait = Duration::from_secs((reset_at - now) as u64 + 1);
        match self.retry.rate_limit_wait(wait) {
            Some(delay) => {
                log::warn!("GitHub quota used up, pausing {:?} until it resets", delay);
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => Err(BriefError::RateLimit {
                service: "GitHub".to_string(),
                retry_at: Some(reset_at),
            }),
        }
    }

    fn note_quota(&self, quota: &RateLimitInfo) {
        let exhausted = if quota.is_exhausted() { quota.reset_at } else { None };
        *self.exhausted_until.lock().unwrap_or_else(|p| p.into_inner()) = exhausted;
    }

    fn url(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| BriefError::Config(format!("invalid GitHub API URL: {}", e)))
    }
}

fn keep_or_record<T>(
    result: Result<Vec<T>>,
    query: GitHubQuery,
    failures: &mut Vec<(GitHubQuery, BriefError)>,
) -> Vec<T> {
    result.unwrap_or_else(|err| {
        log::warn!("GitHub {} query failed: {}", query.label(), err);
        failures.push((query, err));
        Vec::new()
    })
}

/// Reduces a PR's reviews to one status: the latest state-bearing review of
/// each reviewer counts, and any "changes requested" outranks approvals.
pub fn reduce_review_status(reviews: &[ApiReview]) -> Option<ReviewStatus> {
    let mut latest: HashMap<&str, (&str, &str, usize)> = HashMap::new();

    for (index, review) in reviews.iter().enumerate() {
        let Some(user) = &review.user else {
            continue;
        };
        let state = review.state.as_str();
        if !matches!(state, "APPROVED" | "CHANGES_REQUESTED" | "DISMISSED") {
            continue;
        }
        let submitted = review.submitted_at.as_deref().unwrap_or("");
        let newer = latest
            .get(user.login.as_str())
            .map(|(_, seen, seen_index)| (submitted, index) > (*seen, *seen_index))
            .unwrap_or(true);
        if newer {
            latest.insert(user.login.as_str(), (state, submitted, index));
        }
    }

    let states: Vec<&str> = latest.values().map(|(state, _, _)| *state).collect();
    if states.contains(&"CHANGES_REQUESTED") {
        Some(ReviewStatus::ChangesRequested)
    } else if states.contains(&"APPROVED") {
        Some(ReviewStatus::Approved)
    } else {
        None
    }
}

/// Extracts the `rel="next"` target from a `Link` header.
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| p.trim() == "rel=\"next\"");
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

/// `https://api.github.com/repos/o/r/pulls/1` -> `https://github.com/o/r/pull/1`
pub fn api_url_to_html(api_url: &str) -> String {
    api_url
        .replace("api.github.com/repos", "github.com")
        .replace("/pulls/", "/pull/")
}

fn repo_full_name(repository_url: Option<&str>, html_url: &str) -> String {
    if let Some(repo) = repository_url.and_then(|url| url.split_once("/repos/")).map(|(_, r)| r) {
        return repo.trim_end_matches('/').to_string();
    }
    // https://github.com/owner/repo/...
    let parts: Vec<&str> = html_url.split('/').collect();
    if parts.len() >= 5 {
        format!("{}/{}", parts[3], parts[4])
    } else {
        String::new()
    }
}

fn body_preview(body: Option<String>) -> Option<String> {
    let body = body?;
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().count() > BODY_PREVIEW_CHARS {
        let cut: String = trimmed.chars().take(BODY_PREVIEW_CHARS - 3).collect();
        Some(format!("{}...", cut))
    } else {
        Some(trimmed.to_string())
    }
}

fn labels(labels: Vec<ApiLabel>) -> Vec<GitHubLabel> {
    labels
        .into_iter()
        .map(|l| GitHubLabel {
            name: l.name,
            color: l.color,
        })
        .collect()
}

fn issue_to_pr(item: ApiSearchItem) -> GitHubPullRequest {
    GitHubPullRequest {
        id: item.id,
        repo_full_name: repo_full_name(item.repository_url.as_deref(), &item.html_url),
        number: item.number,
        title: item.title,
        state: item.state,
        draft: item.draft.unwrap_or(false),
        user_login: item.user.login,
        user_avatar_url: Some(item.user.avatar_url).filter(|u| !u.is_empty()),
        html_url: item.html_url,
        created_at: item.created_at,
        updated_at: item.updated_at,
        requested_reviewers: Vec::new(),
        labels: labels(item.labels),
        review_status: None,
    }
}

fn issue_to_issue(item: ApiSearchItem) -> GitHubIssue {
    GitHubIssue {
        id: item.id,
        repo_full_name: repo_full_name(item.repository_url.as_deref(), &item.html_url),
        number: item.number,
        title: item.title,
        state: item.state,
        user_login: item.user.login,
        html_url: item.html_url,
        body_preview: body_preview(item.body),
        labels: labels(item.labels),
    }
}
