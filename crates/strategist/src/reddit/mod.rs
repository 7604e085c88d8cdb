//! Reddit collection module.
//!
//! Fetches submissions and comment threads through the official API and
//! normalizes them into the record set the analysis pipeline consumes.

mod client;
mod text;
mod types;

pub use client::{
    CollectError, CollectRequest, Collector, RedditClient, RedditCredentials, SortOrder,
    TimeFilter, MAX_PAGE_SIZE,
};
pub use text::clean_text;
pub use types::{CollectedPost, Comment, Dataset};
