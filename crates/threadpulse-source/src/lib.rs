//! Content sources that supply raw posts and replies for analysis.
//!
//! [`ContentSource::fetch`] never fails: transport, auth and configuration
//! problems are logged and surface as an empty result.
//! [`ContentSource::try_fetch`] returns the typed error instead.

pub mod reddit;

use async_trait::async_trait;
use threadpulse_schema::RawItem;

pub use reddit::{RedditCredentials, RedditSource, RedditSourceConfig};

/// Maximum replies taken from beneath each post.
pub const MAX_REPLIES_PER_POST: usize = 2;

/// Separator placed between a post's title and body.
pub const TITLE_BODY_DELIMITER: &str = " | ";

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Return at most `limit` items about `topic` within `scope`.
    async fn fetch(&self, scope: &str, topic: &str, limit: usize) -> Vec<RawItem>;

    /// Same as [`ContentSource::fetch`] but reports failures, so callers can
    /// tell "nothing matched" from "the source was unreachable".
    async fn try_fetch(
        &self,
        scope: &str,
        topic: &str,
        limit: usize,
    ) -> Result<Vec<RawItem>, SourceError> {
        Ok(self.fetch(scope, topic, limit).await)
    }

    fn name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("content source credentials are not configured")]
    MissingCredentials,
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("unexpected status {status} from {endpoint}")]
    Status { status: u16, endpoint: String },
    #[error("invalid response payload: {0}")]
    Decode(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Number of top-level posts to request for a given item limit.
///
/// Roughly half the limit, since each post may also contribute replies; small
/// limits request the full amount.
pub fn submission_limit(limit: usize) -> usize {
    if limit > 10 {
        limit / 2
    } else {
        limit
    }
}

/// Joins a post title and body into the text that gets analyzed.
pub fn post_text(title: &str, body: &str) -> String {
    format!("{title}{TITLE_BODY_DELIMITER}{body}")
}

/// Bounded collector for fetched items.
///
/// Once `limit` items have been pushed, further pushes are ignored and
/// [`ItemAccumulator::is_full`] reports true so callers can stop fetching.
#[derive(Debug)]
pub struct ItemAccumulator {
    limit: usize,
    items: Vec<RawItem>,
}

impl ItemAccumulator {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            items: Vec::with_capacity(limit.min(256)),
        }
    }

    /// Adds a post if it has body text. Returns true when the limit is reached.
    pub fn push_post(&mut self, native_id: &str, title: &str, body: &str, scope: &str) -> bool {
        if !body.trim().is_empty() {
            self.push(RawItem::post(native_id, post_text(title, body), scope));
        }
        self.is_full()
    }

    /// Adds a reply if it is non-empty. Returns true when the limit is reached.
    pub fn push_reply(&mut self, native_id: &str, body: &str, scope: &str) -> bool {
        if !body.trim().is_empty() {
            self.push(RawItem::reply(native_id, body, scope));
        }
        self.is_full()
    }

    fn push(&mut self, item: RawItem) {
        if !self.is_full() {
            self.items.push(item);
        }
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.limit
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn finish(self) -> Vec<RawItem> {
        self.items
    }
}
