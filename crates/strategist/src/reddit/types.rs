//! Normalized Reddit records produced by the collector.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A comment on a collected post.
///
/// Replies are flattened into the parent post's comment list in thread order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment author (`[deleted]` when the account is gone).
    pub author: String,
    /// Comment text.
    pub body_text: String,
    /// Net upvotes.
    pub score: i64,
    /// When the comment was posted.
    pub created_at: DateTime<Utc>,
}

/// A Reddit submission with its flattened comment thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedPost {
    /// Reddit base36 submission ID.
    pub id: String,
    /// Submission title.
    pub title: String,
    /// Self-text body (empty for link posts).
    #[serde(default)]
    pub body_text: String,
    /// Net upvotes.
    pub score: i64,
    /// Comment count reported by Reddit (may exceed `comments.len()`).
    pub num_comments: u64,
    /// Subreddit display name, without the `r/` prefix.
    pub subreddit: String,
    /// Submission author.
    #[serde(default)]
    pub author: String,
    /// When the submission was posted.
    pub created_at: DateTime<Utc>,
    /// Permalink URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Comments in original thread order.
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl CollectedPost {
    /// Timestamps of the post and all of its comments.
    pub fn timestamps(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        std::iter::once(self.created_at).chain(self.comments.iter().map(|c| c.created_at))
    }
}

/// The record set for one query: what the pipeline consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    /// Search query the posts were collected for.
    pub query: String,
    /// When collection finished.
    pub collected_at: DateTime<Utc>,
    /// Collected posts.
    pub posts: Vec<CollectedPost>,
}

impl Dataset {
    /// Create a dataset stamped with the current time.
    #[must_use]
    pub fn new(query: impl Into<String>, posts: Vec<CollectedPost>) -> Self {
        Self {
            query: query.into(),
            collected_at: Utc::now(),
            posts,
        }
    }

    /// Load a dataset from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let dataset: Self = serde_json::from_str(&content)?;
        Ok(dataset)
    }

    /// Save the dataset to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Total comments across all posts.
    #[must_use]
    pub fn comment_count(&self) -> usize {
        self.posts.iter().map(|p| p.comments.len()).sum()
    }

    /// The `n` highest-scoring posts, ties broken by ID.
    #[must_use]
    pub fn top_posts(&self, n: usize) -> Vec<CollectedPost> {
        let mut posts = self.posts.clone();
        posts.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        posts.truncate(n);
        posts
    }
}
