//! Reddit connector built on the public JSON listings (no OAuth needed for
//! reads). Thread pages are fetched as `<permalink>.json` and flattened;
//! replies require an OAuth token.

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;

use crate::errors::SourceError;
use crate::models::{FeedbackDraft, FeedbackKind};

use super::FeedbackSource;

pub struct RedditJsonSource {
    client: reqwest::Client,
    user_agent: String,
    /// OAuth bearer token; only needed for `post_reply`.
    auth_token: Option<String>,
}

impl RedditJsonSource {
    pub fn new(user_agent: &str, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agent: user_agent.to_string(),
            auth_token,
        }
    }

    /// Normalize a thread URL or permalink to its JSON listing URL.
    fn to_json_url(url: &str) -> Result<String, SourceError> {
        let trimmed = url.split('?').next().unwrap_or(url).trim_end_matches('/');
        let path = if let Some(rest) = trimmed.strip_prefix("https://") {
            let rest = rest
                .trim_start_matches("www.reddit.com")
                .trim_start_matches("old.reddit.com")
                .trim_start_matches("reddit.com");
            rest.to_string()
        } else if trimmed.starts_with("/r/") {
            trimmed.to_string()
        } else {
            return Err(SourceError::Parse(format!("unrecognized thread url: {}", url)));
        };
        if !path.starts_with("/r/") {
            return Err(SourceError::Parse(format!("unrecognized thread url: {}", url)));
        }
        Ok(format!("https://www.reddit.com{}.json", path))
    }

    async fn get_json(&self, url: &str) -> Result<Value, SourceError> {
        let resp = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        match resp.status().as_u16() {
            404 => {
                return Err(SourceError::NotFound {
                    external_id: url.to_string(),
                });
            }
            429 => return Err(SourceError::RateLimited),
            s if s >= 400 => return Err(SourceError::Network(format!("status {}", s))),
            _ => {}
        }

        resp.json::<Value>()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))
    }

    fn parse_created_at(created_utc: Option<f64>) -> String {
        created_utc
            .and_then(|ts| DateTime::from_timestamp(ts as i64, 0))
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default()
    }

    fn draft_from_post(data: &Value) -> Option<FeedbackDraft> {
        let external_id = data.get("name")?.as_str()?.to_string();
        Some(FeedbackDraft {
            external_id,
            kind: FeedbackKind::Post,
            title: data
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string),
            body: data
                .get("selftext")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            author: data
                .get("author")
                .and_then(Value::as_str)
                .unwrap_or("[deleted]")
                .to_string(),
            forum: data
                .get("subreddit")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            permalink: format!(
                "https://www.reddit.com{}",
                data.get("permalink").and_then(Value::as_str).unwrap_or("")
            ),
            score: data.get("score").and_then(Value::as_i64),
            num_comments: data
                .get("num_comments")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            source_created_at: Self::parse_created_at(
                data.get("created_utc").and_then(Value::as_f64),
            ),
        })
    }

    fn draft_from_comment(data: &Value, forum: &str) -> Option<FeedbackDraft> {
        let external_id = data.get("name")?.as_str()?.to_string();
        let body = data.get("body").and_then(Value::as_str)?.to_string();
        Some(FeedbackDraft {
            external_id,
            kind: FeedbackKind::Comment,
            title: None,
            body,
            author: data
                .get("author")
                .and_then(Value::as_str)
                .unwrap_or("[deleted]")
                .to_string(),
            forum: forum.to_string(),
            permalink: format!(
                "https://www.reddit.com{}",
                data.get("permalink").and_then(Value::as_str).unwrap_or("")
            ),
            score: data.get("score").and_then(Value::as_i64),
            num_comments: 0,
            source_created_at: Self::parse_created_at(
                data.get("created_utc").and_then(Value::as_f64),
            ),
        })
    }

    /// Depth-first walk over a comment listing, following nested replies.
    fn flatten_comments(
        children: &[Value],
        forum: &str,
        out: &mut Vec<FeedbackDraft>,
        max_items: usize,
    ) {
        for child in children {
            if out.len() >= max_items {
                return;
            }
            if child.get("kind").and_then(Value::as_str) != Some("t1") {
                continue;
            }
            let Some(data) = child.get("data") else {
                continue;
            };
            if let Some(draft) = Self::draft_from_comment(data, forum) {
                out.push(draft);
            }
            if let Some(replies) = data
                .get("replies")
                .and_then(|r| r.get("data"))
                .and_then(|d| d.get("children"))
                .and_then(Value::as_array)
            {
                Self::flatten_comments(replies, forum, out, max_items);
            }
        }
    }

    /// Search a comment tree for one comment's score.
    fn find_comment_score(children: &[Value], external_id: &str) -> Option<i64> {
        for child in children {
            let Some(data) = child.get("data") else {
                continue;
            };
            if data.get("name").and_then(Value::as_str) == Some(external_id) {
                return data.get("score").and_then(Value::as_i64);
            }
            if let Some(replies) = data
                .get("replies")
                .and_then(|r| r.get("data"))
                .and_then(|d| d.get("children"))
                .and_then(Value::as_array)
            {
                if let Some(score) = Self::find_comment_score(replies, external_id) {
                    return Some(score);
                }
            }
        }
        None
    }
}

#[async_trait]
impl FeedbackSource for RedditJsonSource {
    async fn fetch_thread(
        &self,
        url: &str,
        max_items: usize,
    ) -> Result<Vec<FeedbackDraft>, SourceError> {
        let json_url = Self::to_json_url(url)?;
        let listing = self.get_json(&json_url).await?;

        let listings = listing
            .as_array()
            .ok_or_else(|| SourceError::Parse("thread listing is not an array".into()))?;

        let mut drafts = Vec::new();

        let post_data = listings
            .first()
            .and_then(|l| l.get("data"))
            .and_then(|d| d.get("children"))
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(|c| c.get("data"));
        let forum = post_data
            .and_then(|d| d.get("subreddit"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if let Some(draft) = post_data.and_then(Self::draft_from_post) {
            drafts.push(draft);
        }

        if let Some(children) = listings
            .get(1)
            .and_then(|l| l.get("data"))
            .and_then(|d| d.get("children"))
            .and_then(Value::as_array)
        {
            Self::flatten_comments(children, &forum, &mut drafts, max_items);
        }

        if drafts.is_empty() {
            return Err(SourceError::Parse("thread contained no items".into()));
        }
        drafts.truncate(max_items);
        Ok(drafts)
    }

    async fn fetch_score(
        &self,
        external_id: &str,
        permalink: &str,
    ) -> Result<i64, SourceError> {
        let json_url = Self::to_json_url(permalink)?;
        let listing = self.get_json(&json_url).await?;
        let listings = listing
            .as_array()
            .ok_or_else(|| SourceError::Parse("thread listing is not an array".into()))?;

        // Post score lives in the first listing, comment scores in the second.
        if let Some(post_data) = listings
            .first()
            .and_then(|l| l.get("data"))
            .and_then(|d| d.get("children"))
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(|c| c.get("data"))
        {
            if post_data.get("name").and_then(Value::as_str) == Some(external_id) {
                if let Some(score) = post_data.get("score").and_then(Value::as_i64) {
                    return Ok(score);
                }
            }
        }

        if let Some(children) = listings
            .get(1)
            .and_then(|l| l.get("data"))
            .and_then(|d| d.get("children"))
            .and_then(Value::as_array)
        {
            if let Some(score) = Self::find_comment_score(children, external_id) {
                return Ok(score);
            }
        }

        Err(SourceError::NotFound {
            external_id: external_id.to_string(),
        })
    }

    async fn post_reply(&self, parent_id: &str, text: &str) -> Result<String, SourceError> {
        let token = self.auth_token.as_deref().ok_or_else(|| {
            SourceError::Network("posting replies requires a REDDIT_TOKEN".into())
        })?;

        let resp = self
            .client
            .post("https://oauth.reddit.com/api/comment")
            .header("User-Agent", &self.user_agent)
            .bearer_auth(token)
            .form(&[("api_type", "json"), ("thing_id", parent_id), ("text", text)])
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        match resp.status().as_u16() {
            429 => return Err(SourceError::RateLimited),
            s if s >= 400 => return Err(SourceError::Network(format!("status {}", s))),
            _ => {}
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;
        body.pointer("/json/data/things/0/data/name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SourceError::Parse("comment response missing reply id".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_json_url_variants() {
        for url in [
            "https://www.reddit.com/r/webappfans/comments/abc/title/",
            "https://reddit.com/r/webappfans/comments/abc/title",
            "https://old.reddit.com/r/webappfans/comments/abc/title/?sort=top",
            "/r/webappfans/comments/abc/title",
        ] {
            assert_eq!(
                RedditJsonSource::to_json_url(url).unwrap(),
                "https://www.reddit.com/r/webappfans/comments/abc/title.json"
            );
        }
    }

    #[test]
    fn test_to_json_url_rejects_non_thread_urls() {
        assert!(RedditJsonSource::to_json_url("https://example.com/x").is_err());
        assert!(RedditJsonSource::to_json_url("not a url").is_err());
    }

    #[test]
    fn test_draft_from_post_maps_fields() {
        let data = json!({
            "name": "t3_abc",
            "title": "Uploads failing",
            "selftext": "big files error out",
            "author": "user1",
            "subreddit": "webappfans",
            "permalink": "/r/webappfans/comments/abc/title/",
            "score": 12,
            "num_comments": 4,
            "created_utc": 1767225600.0
        });
        let draft = RedditJsonSource::draft_from_post(&data).unwrap();
        assert_eq!(draft.external_id, "t3_abc");
        assert_eq!(draft.kind, FeedbackKind::Post);
        assert_eq!(draft.title.as_deref(), Some("Uploads failing"));
        assert_eq!(draft.score, Some(12));
        assert!(draft.permalink.starts_with("https://www.reddit.com/r/"));
        assert!(draft.source_created_at.starts_with("2026-01-01"));
    }

    #[test]
    fn test_flatten_comments_follows_replies_and_respects_cap() {
        let children = vec![json!({
            "kind": "t1",
            "data": {
                "name": "t1_a",
                "body": "me too",
                "author": "user2",
                "permalink": "/r/webappfans/comments/abc/_/a/",
                "score": 3,
                "replies": {
                    "data": {
                        "children": [
                            {"kind": "t1", "data": {"name": "t1_b", "body": "same", "author": "user3", "permalink": "/p", "score": 1}},
                            {"kind": "t1", "data": {"name": "t1_c", "body": "also", "author": "user4", "permalink": "/p", "score": 1}}
                        ]
                    }
                }
            }
        })];
        let mut out = Vec::new();
        RedditJsonSource::flatten_comments(&children, "webappfans", &mut out, 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].external_id, "t1_a");
        assert_eq!(out[1].external_id, "t1_b");
        assert_eq!(out[0].kind, FeedbackKind::Comment);
    }

    #[test]
    fn test_flatten_skips_non_comment_kinds() {
        let children = vec![
            json!({"kind": "more", "data": {"name": "t1_more"}}),
            json!({"kind": "t1", "data": {"name": "t1_a", "body": "hi", "author": "u", "permalink": "/p", "score": 0}}),
        ];
        let mut out = Vec::new();
        RedditJsonSource::flatten_comments(&children, "f", &mut out, 10);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_find_comment_score_in_nested_tree() {
        let children = vec![json!({
            "data": {
                "name": "t1_a",
                "score": 3,
                "replies": {
                    "data": {"children": [{"data": {"name": "t1_b", "score": 9}}]}
                }
            }
        })];
        assert_eq!(
            RedditJsonSource::find_comment_score(&children, "t1_b"),
            Some(9)
        );
        assert_eq!(
            RedditJsonSource::find_comment_score(&children, "t1_missing"),
            None
        );
    }
}
