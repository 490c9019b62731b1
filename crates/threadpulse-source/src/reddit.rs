use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use threadpulse_schema::RawItem;
use tokio::sync::Mutex;

use crate::{submission_limit, ContentSource, ItemAccumulator, SourceError, MAX_REPLIES_PER_POST};

const AUTH_BASE: &str = "https://www.reddit.com";
const API_BASE: &str = "https://oauth.reddit.com";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const REPLY_FETCH_WINDOW: usize = 8;

/// Application credentials for the Reddit API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedditCredentials {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl RedditCredentials {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
            user_agent: Some(user_agent.into()),
        }
    }

    fn complete(&self) -> Option<(&str, &str, &str)> {
        fn non_blank(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|s| !s.trim().is_empty())
        }
        Some((
            non_blank(&self.client_id)?,
            non_blank(&self.client_secret)?,
            non_blank(&self.user_agent)?,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct RedditSourceConfig {
    pub credentials: RedditCredentials,
    pub auth_base: String,
    pub api_base: String,
    pub timeout_secs: u64,
}

impl RedditSourceConfig {
    pub fn new(credentials: RedditCredentials) -> Self {
        Self {
            credentials,
            auth_base: AUTH_BASE.to_string(),
            api_base: API_BASE.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Point both the token and listing endpoints at one base URL.
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        let base = base.into();
        self.auth_base = base.clone();
        self.api_base = base;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Searches a subreddit for recent posts and pulls a few replies under each.
pub struct RedditSource {
    client: reqwest::Client,
    config: RedditSourceConfig,
    token: Mutex<Option<AccessToken>>,
}

impl RedditSource {
    pub fn new(config: RedditSourceConfig) -> Self {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        match config.credentials.complete() {
            Some((_, _, user_agent)) => builder = builder.user_agent(user_agent.to_string()),
            None => tracing::warn!(
                "Reddit credentials are not configured; analysis requests will return no data"
            ),
        }
        let client = builder.build().unwrap_or_else(|e| {
            tracing::warn!("Reddit client build failed, using defaults without a timeout: {e}");
            reqwest::Client::new()
        });
        Self {
            client,
            config,
            token: Mutex::new(None),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.config.credentials.complete().is_some()
    }

    async fn access_token(&self) -> Result<String, SourceError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let (client_id, client_secret, _) = self
            .config
            .credentials
            .complete()
            .ok_or(SourceError::MissingCredentials)?;
        let url = format!("{}/api/v1/access_token", self.config.auth_base);
        let resp = self
            .client
            .post(&url)
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Auth(format!("{status}: {body}")));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        let Some(value) = token.access_token.filter(|t| !t.is_empty()) else {
            return Err(SourceError::Auth(
                token.error.unwrap_or_else(|| "no access token issued".into()),
            ));
        };

        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        *cached = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        });
        Ok(value)
    }

    async fn search(
        &self,
        token: &str,
        subreddit: &str,
        topic: &str,
        limit: usize,
    ) -> Result<Vec<LinkData>, SourceError> {
        let url = format!("{}/r/{subreddit}/search", self.config.api_base);
        let limit = limit.to_string();
        let listing: Listing = self
            .get_json(
                &url,
                token,
                &[
                    ("q", topic),
                    ("restrict_sr", "1"),
                    ("sort", "new"),
                    ("limit", limit.as_str()),
                    ("raw_json", "1"),
                ],
            )
            .await?;
        Ok(listing.things::<LinkData>("t3"))
    }

    async fn replies(
        &self,
        token: &str,
        subreddit: &str,
        post_id: &str,
    ) -> Result<Vec<CommentData>, SourceError> {
        let url = format!("{}/r/{subreddit}/comments/{post_id}", self.config.api_base);
        let limit = REPLY_FETCH_WINDOW.to_string();
        let listings: Vec<Listing> = self
            .get_json(
                &url,
                token,
                &[("limit", limit.as_str()), ("depth", "1"), ("raw_json", "1")],
            )
            .await?;
        // [0] is the post itself, [1] its top-level comments.
        Ok(listings
            .into_iter()
            .nth(1)
            .map(|l| l.things::<CommentData>("t1"))
            .unwrap_or_default())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                endpoint: url.to_string(),
            });
        }
        resp.json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }

    fn transport_error(&self, e: reqwest::Error) -> SourceError {
        if e.is_timeout() {
            SourceError::Timeout(self.config.timeout_secs)
        } else {
            SourceError::Http(e)
        }
    }
}

#[async_trait]
impl ContentSource for RedditSource {
    async fn fetch(&self, scope: &str, topic: &str, limit: usize) -> Vec<RawItem> {
        match self.try_fetch(scope, topic, limit).await {
            Ok(items) => items,
            Err(SourceError::MissingCredentials) => Vec::new(),
            Err(e) => {
                tracing::error!("Reddit fetch failed for r/{scope} '{topic}': {e}");
                Vec::new()
            }
        }
    }

    async fn try_fetch(
        &self,
        scope: &str,
        topic: &str,
        limit: usize,
    ) -> Result<Vec<RawItem>, SourceError> {
        if !self.has_credentials() {
            return Err(SourceError::MissingCredentials);
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let token = self.access_token().await?;
        let subreddit = normalize_scope(scope);
        let posts = self
            .search(&token, subreddit, topic, submission_limit(limit))
            .await?;

        let mut acc = ItemAccumulator::new(limit);
        'posts: for post in posts {
            if acc.push_post(&post.id, &post.title, &post.selftext, scope) {
                break;
            }
            let replies = match self.replies(&token, subreddit, &post.id).await {
                Ok(replies) => replies,
                Err(e) => {
                    tracing::warn!("Skipping replies for post {}: {e}", post.id);
                    continue;
                }
            };
            for reply in replies.into_iter().take(MAX_REPLIES_PER_POST) {
                if acc.push_reply(&reply.id, &reply.body, scope) {
                    break 'posts;
                }
            }
        }

        let items = acc.finish();
        tracing::debug!(
            "Fetched {} items from r/{subreddit} for '{topic}'",
            items.len()
        );
        Ok(items)
    }

    fn name(&self) -> &str {
        "reddit"
    }
}

/// Accepts `apple`, `r/apple` or `/r/apple`.
fn normalize_scope(scope: &str) -> &str {
    let s = scope.trim().trim_start_matches('/');
    s.strip_prefix("r/").unwrap_or(s)
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Thing>,
}

#[derive(Deserialize)]
struct Thing {
    kind: String,
    data: serde_json::Value,
}

impl Listing {
    /// Children of the given kind, in listing order. Malformed entries are dropped.
    fn things<T: serde::de::DeserializeOwned>(self, kind: &str) -> Vec<T> {
        self.data
            .children
            .into_iter()
            .filter(|t| t.kind == kind)
            .filter_map(|t| serde_json::from_value(t.data).ok())
            .collect()
    }
}

#[derive(Deserialize)]
struct LinkData {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
}

#[derive(Deserialize)]
struct CommentData {
    id: String,
    #[serde(default)]
    body: String,
}
