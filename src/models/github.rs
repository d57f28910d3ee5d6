use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitHubUser {
    pub login: String,
    pub avatar_url: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitHubLabel {
    pub name: String,
    pub color: String,
}

/// Reduced review outcome of a pull request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    ChangesRequested,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitHubPullRequest {
    pub id: i64,
    pub repo_full_name: String,
    pub number: i64,
    pub title: String,
    pub state: String,
    pub draft: bool,
    pub user_login: String,
    pub user_avatar_url: Option<String>,
    pub html_url: String,
    pub created_at: String,
    pub updated_at: String,
    pub requested_reviewers: Vec<String>,
    pub labels: Vec<GitHubLabel>,
    pub review_status: Option<ReviewStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitHubIssue {
    pub id: i64,
    pub repo_full_name: String,
    pub number: i64,
    pub title: String,
    pub state: String,
    pub user_login: String,
    pub html_url: String,
    pub body_preview: Option<String>,
    pub labels: Vec<GitHubLabel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitHubNotification {
    pub id: String,
    pub repo_full_name: String,
    pub subject_title: String,
    pub subject_type: String,
    pub reason: String,
    pub unread: bool,
    pub updated_at: String,
    pub url: Option<String>,
}

/// One of the four independent queries behind a GitHub brief.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GitHubQuery {
    PrsToReview,
    MyOpenPrs,
    MentionedIssues,
    Notifications,
}

impl GitHubQuery {
    pub fn label(&self) -> &'static str {
        match self {
            GitHubQuery::PrsToReview => "PRs to review",
            GitHubQuery::MyOpenPrs => "my open PRs",
            GitHubQuery::MentionedIssues => "mentioned issues",
            GitHubQuery::Notifications => "notifications",
        }
    }
}

/// A sub-query that failed; its list in the brief is empty because of this,
/// not because there was nothing to show.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitHubQueryError {
    pub query: GitHubQuery,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GitHubBrief {
    pub prs_to_review: Vec<GitHubPullRequest>,
    pub my_open_prs: Vec<GitHubPullRequest>,
    pub mentioned_issues: Vec<GitHubIssue>,
    pub notifications: Vec<GitHubNotification>,
    pub last_updated: Option<i64>,
    #[serde(default)]
    pub query_errors: Vec<GitHubQueryError>,
}

impl GitHubBrief {
    pub fn is_partial(&self) -> bool {
        !self.query_errors.is_empty()
    }
}

// GitHub REST API response shapes

#[derive(Debug, Deserialize)]
pub struct ApiUser {
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiLabel {
    pub name: String,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiSearchItem {
    pub id: i64,
    pub number: i64,
    pub title: String,
    pub state: String,
    pub user: ApiUser,
    pub html_url: String,
    pub repository_url: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<ApiLabel>,
    #[serde(default)]
    pub draft: Option<bool>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ApiSearchResult<T> {
    #[allow(dead_code)]
    pub total_count: i64,
    pub items: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct ApiNotification {
    pub id: String,
    pub repository: ApiRepository,
    pub subject: ApiSubject,
    pub reason: String,
    pub unread: bool,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiRepository {
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiSubject {
    pub title: String,
    #[serde(rename = "type")]
    pub subject_type: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiReview {
    pub user: Option<ApiReviewUser>,
    pub state: String,
    pub submitted_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiReviewUser {
    pub login: String,
}
