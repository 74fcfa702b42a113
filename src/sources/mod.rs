//! Feedback-source capability.
//!
//! The pipeline never talks to a vendor API directly — it goes through the
//! `FeedbackSource` trait so the connector is pluggable and tests/demo runs
//! can inject a deterministic fixture source.

pub mod fixture;
pub mod reddit;

use async_trait::async_trait;

use crate::errors::SourceError;
use crate::models::FeedbackDraft;

pub use fixture::FixtureSource;
pub use reddit::RedditJsonSource;

#[async_trait]
pub trait FeedbackSource: Send + Sync {
    /// Fetch a thread (post plus flattened comments) as feedback drafts.
    async fn fetch_thread(
        &self,
        url: &str,
        max_items: usize,
    ) -> Result<Vec<FeedbackDraft>, SourceError>;

    /// Current engagement score for one item. `NotFound` and `RateLimited`
    /// are distinct kinds; both leave the caller free to retry later.
    async fn fetch_score(&self, external_id: &str, permalink: &str)
    -> Result<i64, SourceError>;

    /// Post a public reply under the given item; returns the reply's
    /// external identifier.
    async fn post_reply(&self, parent_id: &str, text: &str) -> Result<String, SourceError>;
}
