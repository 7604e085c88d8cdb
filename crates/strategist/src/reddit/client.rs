//! Reddit API collector.
//!
//! Uses application-only OAuth against the official API. Only the first page
//! of each listing is read; Reddit caps a page at 100 items.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::USER_AGENT;
use reqwest::Client;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

use super::text::clean_text;
use super::types::{CollectedPost, Comment, Dataset};

const AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";
const PUBLIC_BASE: &str = "https://www.reddit.com";

/// Reddit's per-page maximum.
pub const MAX_PAGE_SIZE: usize = 100;

/// Errors raised while collecting from Reddit.
#[derive(Debug, Error)]
pub enum CollectError {
    /// Client ID, secret or user agent is missing
    #[error("Missing Reddit API credentials: {0} is not set")]
    MissingCredentials(&'static str),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Token endpoint rejected the credentials
    #[error("Reddit authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    /// API answered with a non-success status
    #[error("Reddit API error ({status}) for {path}")]
    Api { status: u16, path: String },

    /// Not a submission URL or permalink
    #[error("Invalid Reddit post URL: {0}")]
    InvalidUrl(String),
}

/// Listing sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Relevance,
    Hot,
    Top,
    New,
    Comments,
}

impl SortOrder {
    fn as_str(self) -> &'static str {
        match self {
            SortOrder::Relevance => "relevance",
            SortOrder::Hot => "hot",
            SortOrder::Top => "top",
            SortOrder::New => "new",
            SortOrder::Comments => "comments",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "relevance" => Ok(SortOrder::Relevance),
            "hot" => Ok(SortOrder::Hot),
            "top" => Ok(SortOrder::Top),
            "new" => Ok(SortOrder::New),
            "comments" => Ok(SortOrder::Comments),
            other => Err(format!(
                "unknown sort '{other}' (expected relevance, hot, top, new, comments)"
            )),
        }
    }
}

/// Time window for search and `top` listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFilter {
    Hour,
    Day,
    Week,
    Month,
    Year,
    #[default]
    All,
}

impl TimeFilter {
    fn as_str(self) -> &'static str {
        match self {
            TimeFilter::Hour => "hour",
            TimeFilter::Day => "day",
            TimeFilter::Week => "week",
            TimeFilter::Month => "month",
            TimeFilter::Year => "year",
            TimeFilter::All => "all",
        }
    }
}

impl fmt::Display for TimeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hour" => Ok(TimeFilter::Hour),
            "day" => Ok(TimeFilter::Day),
            "week" => Ok(TimeFilter::Week),
            "month" => Ok(TimeFilter::Month),
            "year" => Ok(TimeFilter::Year),
            "all" => Ok(TimeFilter::All),
            other => Err(format!(
                "unknown time filter '{other}' (expected hour, day, week, month, year, all)"
            )),
        }
    }
}

/// What to collect for one query.
#[derive(Debug, Clone)]
pub struct CollectRequest {
    /// Search query.
    pub query: String,
    /// Restrict to a subreddit listing instead of site-wide search.
    pub subreddit: Option<String>,
    /// Sort order.
    pub sort: SortOrder,
    /// Time window.
    pub time_filter: TimeFilter,
    /// Max posts to fetch (capped at one page).
    pub limit: usize,
}

impl CollectRequest {
    /// Site-wide search with default sort and time window.
    #[must_use]
    pub fn search(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            subreddit: None,
            sort: SortOrder::default(),
            time_filter: TimeFilter::default(),
            limit,
        }
    }
}

/// Source of collected posts for the pipeline.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Collect posts and comments for a request.
    async fn collect(&self, request: &CollectRequest) -> Result<Dataset, CollectError>;
}

/// Reddit application credentials.
#[derive(Debug, Clone)]
pub struct RedditCredentials {
    client_id: String,
    client_secret: String,
    user_agent: String,
}

impl RedditCredentials {
    /// Validate and wrap credentials.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Result<Self, CollectError> {
        let creds = Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            user_agent: user_agent.into(),
        };
        if creds.client_id.trim().is_empty() {
            return Err(CollectError::MissingCredentials("REDDIT_CLIENT_ID"));
        }
        if creds.client_secret.trim().is_empty() {
            return Err(CollectError::MissingCredentials("REDDIT_CLIENT_SECRET"));
        }
        if creds.user_agent.trim().is_empty() {
            return Err(CollectError::MissingCredentials("REDDIT_USER_AGENT"));
        }
        Ok(creds)
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData<T> {
    children: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SubmissionThing {
    data: SubmissionData,
}

#[derive(Debug, Deserialize)]
struct SubmissionData {
    id: String,
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: u64,
    subreddit: String,
    #[serde(default)]
    author: Option<String>,
    created_utc: f64,
    permalink: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", content = "data")]
enum CommentThing {
    #[serde(rename = "t1")]
    Comment(Box<CommentData>),
    #[serde(rename = "more")]
    More(IgnoredAny),
}

#[derive(Debug, Deserialize)]
struct CommentData {
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    score: i64,
    created_utc: f64,
    #[serde(default)]
    replies: Option<Replies>,
}

/// Reddit sends `""` instead of a listing when a comment has no replies.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Replies {
    Listing(Listing<CommentThing>),
    Empty(String),
}

/// Reddit API client.
pub struct RedditClient {
    http: Client,
    credentials: RedditCredentials,
    auth_url: String,
    api_base: String,
    request_delay: Duration,
    token: RwLock<Option<AccessToken>>,
}

impl RedditClient {
    /// Create a client for the public Reddit API.
    pub fn new(credentials: RedditCredentials) -> Result<Self, CollectError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            credentials,
            auth_url: AUTH_URL.to_string(),
            api_base: API_BASE.to_string(),
            request_delay: Duration::from_secs(1),
            token: RwLock::new(None),
        })
    }

    /// Point the client at different token and API endpoints.
    #[must_use]
    pub fn with_endpoints(
        mut self,
        auth_url: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        self.auth_url = auth_url.into();
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Pause between submission fetches.
    #[must_use]
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    async fn access_token(&self) -> Result<String, CollectError> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        tracing::debug!("Requesting Reddit access token");
        let response = self
            .http
            .post(&self.auth_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .header(USER_AGENT, &self.credentials.user_agent)
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CollectError::Auth {
                status: status.as_u16(),
                message,
            });
        }

        let body: TokenResponse = response.json().await?;
        let token = AccessToken {
            value: body.access_token,
            // Refresh a minute early
            expires_at: Instant::now() + Duration::from_secs(body.expires_in.saturating_sub(60)),
        };
        let value = token.value.clone();
        *self.token.write().await = Some(token);
        Ok(value)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, CollectError> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.api_base, path);

        tracing::debug!(%url, ?query, "Reddit GET");
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header(USER_AGENT, &self.credentials.user_agent)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectError::Api {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        Ok(response.json::<T>().await?)
    }

    /// Search site-wide and return submission permalinks.
    pub async fn search(
        &self,
        query: &str,
        sort: SortOrder,
        time_filter: TimeFilter,
        limit: usize,
    ) -> Result<Vec<String>, CollectError> {
        tracing::info!(
            query,
            sort = %sort,
            time_filter = %time_filter,
            "Searching Reddit"
        );

        let listing: Listing<SubmissionThing> = self
            .get(
                "/search",
                &[
                    ("q", query.to_string()),
                    ("sort", sort.to_string()),
                    ("t", time_filter.to_string()),
                    ("limit", limit.clamp(1, MAX_PAGE_SIZE).to_string()),
                    ("type", "link".to_string()),
                    ("raw_json", "1".to_string()),
                ],
            )
            .await?;

        Ok(permalinks(listing))
    }

    /// List a subreddit's posts and return submission permalinks.
    ///
    /// Only `hot`, `new` and `top` listings exist; other sorts fall back to `hot`.
    pub async fn subreddit_posts(
        &self,
        subreddit: &str,
        sort: SortOrder,
        time_filter: TimeFilter,
        limit: usize,
    ) -> Result<Vec<String>, CollectError> {
        let name = subreddit.trim_start_matches("r/");
        let listing_sort = match sort {
            SortOrder::New => "new",
            SortOrder::Top => "top",
            _ => "hot",
        };

        tracing::info!(subreddit = name, sort = listing_sort, "Fetching subreddit posts");

        let mut query = vec![
            ("limit", limit.clamp(1, MAX_PAGE_SIZE).to_string()),
            ("raw_json", "1".to_string()),
        ];
        if listing_sort == "top" {
            query.push(("t", time_filter.to_string()));
        }

        let listing: Listing<SubmissionThing> = self
            .get(&format!("/r/{name}/{listing_sort}"), &query)
            .await?;

        Ok(permalinks(listing))
    }

    /// Fetch a submission and its full comment tree.
    pub async fn fetch_post(&self, url: &str) -> Result<CollectedPost, CollectError> {
        let path = permalink_path(url)?;

        let (post_listing, comment_listing): (Listing<SubmissionThing>, Listing<CommentThing>) =
            self.get(&path, &[("raw_json", "1".to_string())]).await?;

        let submission = post_listing
            .data
            .children
            .into_iter()
            .next()
            .map(|t| t.data)
            .ok_or_else(|| CollectError::InvalidUrl(url.to_string()))?;

        let mut comments = Vec::new();
        flatten_comments(comment_listing.data.children, &mut comments);

        Ok(CollectedPost {
            url: Some(format!("{PUBLIC_BASE}{}", submission.permalink)),
            id: submission.id,
            title: clean_text(&submission.title),
            body_text: clean_text(&submission.selftext),
            score: submission.score,
            num_comments: submission.num_comments,
            subreddit: submission.subreddit,
            author: author_or_deleted(submission.author),
            created_at: utc_from_epoch(submission.created_utc),
            comments,
        })
    }
}

#[async_trait]
impl Collector for RedditClient {
    async fn collect(&self, request: &CollectRequest) -> Result<Dataset, CollectError> {
        let urls = match &request.subreddit {
            Some(subreddit) => {
                self.subreddit_posts(subreddit, request.sort, request.time_filter, request.limit)
                    .await?
            }
            None => {
                self.search(&request.query, request.sort, request.time_filter, request.limit)
                    .await?
            }
        };

        let mut seen = HashSet::new();
        let urls: Vec<String> = urls
            .into_iter()
            .filter(|u| seen.insert(u.clone()))
            .take(request.limit)
            .collect();

        tracing::info!(count = urls.len(), "Collected post URLs");

        let mut posts = Vec::with_capacity(urls.len());
        for (i, url) in urls.iter().enumerate() {
            if i > 0 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }

            match self.fetch_post(url).await {
                Ok(post) => {
                    tracing::debug!(id = %post.id, comments = post.comments.len(), "Fetched post");
                    posts.push(post);
                }
                Err(e) => {
                    tracing::warn!(%url, error = %e, "Failed to fetch post, skipping");
                }
            }
        }

        tracing::info!(
            posts = posts.len(),
            comments = posts.iter().map(|p| p.comments.len()).sum::<usize>(),
            "Finished collecting posts"
        );

        Ok(Dataset::new(request.query.clone(), posts))
    }
}

fn permalinks(listing: Listing<SubmissionThing>) -> Vec<String> {
    listing
        .data
        .children
        .into_iter()
        .map(|t| format!("{PUBLIC_BASE}{}", t.data.permalink))
        .collect()
}

/// Reduce a full URL or permalink to an API path like `/r/x/comments/id/slug`.
fn permalink_path(url: &str) -> Result<String, CollectError> {
    let start = url
        .find("/r/")
        .ok_or_else(|| CollectError::InvalidUrl(url.to_string()))?;
    let path = url[start..]
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/')
        .trim_end_matches(".json");

    if !path.contains("/comments/") {
        return Err(CollectError::InvalidUrl(url.to_string()));
    }
    Ok(path.to_string())
}

fn flatten_comments(children: Vec<CommentThing>, out: &mut Vec<Comment>) {
    for child in children {
        let CommentThing::Comment(data) = child else {
            continue;
        };
        let data = *data;
        out.push(Comment {
            author: author_or_deleted(data.author),
            body_text: clean_text(&data.body),
            score: data.score,
            created_at: utc_from_epoch(data.created_utc),
        });
        if let Some(Replies::Listing(listing)) = data.replies {
            flatten_comments(listing.data.children, out);
        }
    }
}

fn author_or_deleted(author: Option<String>) -> String {
    author
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| "[deleted]".to_string())
}

fn utc_from_epoch(secs: f64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs as i64, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permalink_path() {
        assert_eq!(
            permalink_path("https://www.reddit.com/r/running/comments/abc123/best_shoes/").unwrap(),
            "/r/running/comments/abc123/best_shoes"
        );
        assert_eq!(
            permalink_path("/r/running/comments/abc123/best_shoes/?utm=x").unwrap(),
            "/r/running/comments/abc123/best_shoes"
        );
        assert!(permalink_path("https://www.reddit.com/r/running/").is_err());
        assert!(permalink_path("https://example.com/post").is_err());
    }

    #[test]
    fn test_sort_and_time_filter_parse() {
        assert_eq!("TOP".parse::<SortOrder>().unwrap(), SortOrder::Top);
        assert_eq!("week".parse::<TimeFilter>().unwrap(), TimeFilter::Week);
        assert!("sideways".parse::<SortOrder>().is_err());
        assert_eq!(TimeFilter::default().to_string(), "all");
    }

    #[test]
    fn test_credentials_require_all_fields() {
        assert!(matches!(
            RedditCredentials::new("id", "", "agent"),
            Err(CollectError::MissingCredentials("REDDIT_CLIENT_SECRET"))
        ));
        assert!(RedditCredentials::new("id", "secret", "agent/1.0").is_ok());
    }

    #[test]
    fn test_flatten_keeps_thread_order_and_skips_more() {
        let json = serde_json::json!([
            {"kind": "t1", "data": {
                "author": "alice", "body": "top", "score": 5, "created_utc": 1_714_560_000.0,
                "replies": {"kind": "Listing", "data": {"children": [
                    {"kind": "t1", "data": {"author": null, "body": "reply", "score": 1,
                        "created_utc": 1_714_560_100.0, "replies": ""}},
                    {"kind": "more", "data": {"count": 4, "children": ["x"]}}
                ]}}
            }},
            {"kind": "t1", "data": {"author": "bob", "body": "second", "score": 9,
                "created_utc": 1_714_560_050.0, "replies": ""}}
        ]);
        let children: Vec<CommentThing> = serde_json::from_value(json).unwrap();

        let mut out = Vec::new();
        flatten_comments(children, &mut out);

        let bodies: Vec<_> = out.iter().map(|c| c.body_text.as_str()).collect();
        assert_eq!(bodies, vec!["top", "reply", "second"]);
        assert_eq!(out[1].author, "[deleted]");
    }
}
