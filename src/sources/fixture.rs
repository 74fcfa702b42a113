//! Deterministic fixture source for demo mode and offline runs.
//!
//! Serves a canned thread spanning the default taxonomy themes, reports a
//! fixed above-threshold score for everything, and fabricates reply ids.
//! No network, no credentials, same output every run.

use async_trait::async_trait;

use crate::errors::SourceError;
use crate::models::{FeedbackDraft, FeedbackKind};

use super::FeedbackSource;

const FIXTURE_SCORE: i64 = 5;

pub struct FixtureSource;

impl FixtureSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FixtureSource {
    fn default() -> Self {
        Self::new()
    }
}

fn fixture_drafts() -> Vec<FeedbackDraft> {
    let seed = [
        (
            "t3_demo1",
            FeedbackKind::Post,
            Some("Uploads fail for anything over 10MB"),
            "Every time I try to upload a larger file the import just dies with a generic error.",
            "demo_user1",
        ),
        (
            "t1_demo2",
            FeedbackKind::Comment,
            None,
            "Same here, csv import breaks constantly for me too.",
            "demo_user2",
        ),
        (
            "t1_demo3",
            FeedbackKind::Comment,
            None,
            "Any chance of a dark mode? My eyes would be grateful.",
            "demo_user3",
        ),
        (
            "t1_demo4",
            FeedbackKind::Comment,
            None,
            "The dashboard is painfully slow to load since the last update, constant lag.",
            "demo_user4",
        ),
        (
            "t1_demo5",
            FeedbackKind::Comment,
            None,
            "Login keeps rejecting my password even after a reset.",
            "demo_user5",
        ),
    ];

    seed.iter()
        .map(|(id, kind, title, body, author)| FeedbackDraft {
            external_id: id.to_string(),
            kind: *kind,
            title: title.map(str::to_string),
            body: body.to_string(),
            author: author.to_string(),
            forum: "webappfans".to_string(),
            permalink: format!("https://www.reddit.com/r/webappfans/comments/demo/{}", id),
            score: None,
            num_comments: 4,
            source_created_at: "2026-01-01T00:00:00+00:00".to_string(),
        })
        .collect()
}

#[async_trait]
impl FeedbackSource for FixtureSource {
    async fn fetch_thread(
        &self,
        _url: &str,
        max_items: usize,
    ) -> Result<Vec<FeedbackDraft>, SourceError> {
        let mut drafts = fixture_drafts();
        drafts.truncate(max_items);
        Ok(drafts)
    }

    async fn fetch_score(
        &self,
        _external_id: &str,
        _permalink: &str,
    ) -> Result<i64, SourceError> {
        Ok(FIXTURE_SCORE)
    }

    async fn post_reply(&self, parent_id: &str, _text: &str) -> Result<String, SourceError> {
        Ok(format!("t1_demo_reply_{}", parent_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_thread_is_deterministic() {
        let source = FixtureSource::new();
        let first = source.fetch_thread("any", 50).await.unwrap();
        let second = source.fetch_thread("any", 50).await.unwrap();
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].external_id, second[0].external_id);
        assert_eq!(first.len(), 5);
    }

    #[tokio::test]
    async fn test_fixture_respects_max_items() {
        let source = FixtureSource::new();
        let drafts = source.fetch_thread("any", 2).await.unwrap();
        assert_eq!(drafts.len(), 2);
    }

    #[tokio::test]
    async fn test_fixture_score_clears_default_threshold() {
        let source = FixtureSource::new();
        let score = source.fetch_score("t3_demo1", "permalink").await.unwrap();
        assert!(score >= 2);
    }

    #[tokio::test]
    async fn test_fixture_reply_ids_are_stable() {
        let source = FixtureSource::new();
        let a = source.post_reply("t3_demo1", "summary").await.unwrap();
        let b = source.post_reply("t3_demo1", "summary").await.unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("t1_demo_reply_"));
    }
}
