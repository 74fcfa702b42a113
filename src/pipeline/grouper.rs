//! Insight grouper.
//!
//! Claims READY items (the exclusive pick-up step) and folds them into
//! themed insights: an item joins the earliest open insight whose theme
//! signature matches, or founds a new one. Classification itself is the
//! pure `taxonomy::classify` function; grouping only moves ownership
//! links, never item lifecycle status.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::db::DbHandle;
use crate::models::FeedbackItem;
use crate::taxonomy::Taxonomy;

#[derive(Debug, Default, Clone, Serialize)]
pub struct GroupReport {
    pub items_processed: usize,
    pub insights_created: usize,
    pub insights_updated: usize,
}

pub struct InsightGrouper {
    db: DbHandle,
    taxonomy: Arc<Taxonomy>,
}

impl InsightGrouper {
    pub fn new(db: DbHandle, taxonomy: Arc<Taxonomy>) -> Self {
        Self { db, taxonomy }
    }

    /// Group a batch of READY items. Concurrent invocations are safe: each
    /// item is claimed with a conditional update before it is grouped, so
    /// two overlapping runs partition the batch instead of double-counting.
    pub async fn run(&self, limit: i64) -> Result<GroupReport> {
        let candidates = self
            .db
            .call(move |db| db.list_claimable_feedback(limit))
            .await?;

        let mut claimed: Vec<FeedbackItem> = Vec::new();
        for item in candidates {
            let id = item.id;
            if let Some(item) = self.db.call(move |db| db.claim_feedback(id)).await? {
                claimed.push(item);
            }
        }

        // BTreeMap keeps theme iteration deterministic.
        let mut groups: BTreeMap<String, (String, Vec<FeedbackItem>)> = BTreeMap::new();
        for item in claimed {
            let matched = self.taxonomy.classify(item.title.as_deref(), &item.body);
            debug!(external_id = %item.external_id, theme = %matched.theme, overlap = matched.overlap, "classified");
            groups
                .entry(matched.theme)
                .or_insert_with(|| (matched.description, Vec::new()))
                .1
                .push(item);
        }

        let mut report = GroupReport::default();
        for (theme, (description, items)) in groups {
            let count = items.len() as i64;
            let theme_for_db = theme.clone();
            let description_for_db = description.clone();
            let existing = self
                .db
                .call(move |db| db.find_open_insight_by_theme(&theme_for_db))
                .await?;

            let insight = match existing {
                Some(insight) => {
                    let id = insight.id;
                    let updated = self
                        .db
                        .call(move |db| db.add_insight_entries(id, count, &description_for_db))
                        .await?;
                    report.insights_updated += 1;
                    updated
                }
                None => {
                    let theme_for_db = theme.clone();
                    let created = self
                        .db
                        .call(move |db| {
                            db.create_insight(&theme_for_db, &description_for_db, count)
                        })
                        .await?;
                    report.insights_created += 1;
                    created
                }
            };

            for item in items {
                let (item_id, insight_id) = (item.id, insight.id);
                self.db
                    .call(move |db| db.assign_feedback_to_insight(item_id, insight_id))
                    .await?;
                report.items_processed += 1;
            }
        }

        info!(
            items = report.items_processed,
            created = report.insights_created,
            updated = report.insights_updated,
            "grouping pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::models::{FeedbackDraft, FeedbackKind, FeedbackStatus};

    fn draft(external_id: &str, title: &str, body: &str) -> FeedbackDraft {
        FeedbackDraft {
            external_id: external_id.to_string(),
            kind: FeedbackKind::Post,
            title: Some(title.to_string()),
            body: body.to_string(),
            author: "a".to_string(),
            forum: "f".to_string(),
            permalink: format!("https://example.com/{}", external_id),
            score: Some(5),
            num_comments: 0,
            source_created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn grouper(db: &DbHandle) -> InsightGrouper {
        InsightGrouper::new(db.clone(), Arc::new(Taxonomy::default()))
    }

    async fn seed(db: &DbHandle, external_id: &str, title: &str, body: &str) {
        let d = draft(external_id, title, body);
        db.call(move |s| s.upsert_feedback(&d, 2).map(|_| ()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_grouping_creates_themed_insights() {
        let db = DbHandle::new(Store::open_in_memory().unwrap());
        seed(&db, "t3_a", "Upload keeps failing", "large file dies").await;
        seed(&db, "t3_b", "csv import broken", "attachment errors").await;
        seed(&db, "t3_c", "dark mode please", "night mode would be great").await;

        let report = grouper(&db).run(100).await.unwrap();
        assert_eq!(report.items_processed, 3);
        assert_eq!(report.insights_created, 2);
        assert_eq!(report.insights_updated, 0);

        let insights = db.call(|s| s.list_insights(None, 100)).await.unwrap();
        let themes: Vec<_> = insights.iter().map(|i| i.theme.as_str()).collect();
        assert!(themes.contains(&"File Upload Issues"));
        assert!(themes.contains(&"Dark Mode Requests"));
    }

    #[tokio::test]
    async fn test_grouping_conservation_invariant() {
        let db = DbHandle::new(Store::open_in_memory().unwrap());
        seed(&db, "t3_a", "Upload failing", "x").await;
        seed(&db, "t3_b", "another upload bug", "y").await;
        grouper(&db).run(100).await.unwrap();

        // Second batch joins the existing insight.
        seed(&db, "t3_c", "file import broken", "z").await;
        let report = grouper(&db).run(100).await.unwrap();
        assert_eq!(report.insights_updated, 1);
        assert_eq!(report.insights_created, 0);

        let insights = db.call(|s| s.list_insights(None, 100)).await.unwrap();
        for insight in insights {
            let linked = {
                let id = insight.id;
                db.call(move |s| s.linked_entry_count(id)).await.unwrap()
            };
            assert_eq!(insight.entry_count, linked, "theme {}", insight.theme);
        }
    }

    #[tokio::test]
    async fn test_grouped_items_are_claimed_exactly_once() {
        let db = DbHandle::new(Store::open_in_memory().unwrap());
        seed(&db, "t3_a", "Upload failing", "x").await;

        let first = grouper(&db).run(100).await.unwrap();
        assert_eq!(first.items_processed, 1);
        // Item is now PROCESSING; a second run finds nothing claimable.
        let second = grouper(&db).run(100).await.unwrap();
        assert_eq!(second.items_processed, 0);

        let item = db
            .call(|s| s.get_feedback_by_external_id("t3_a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.status, FeedbackStatus::Processing);
    }

    #[tokio::test]
    async fn test_unmatched_items_fall_to_catch_all() {
        let db = DbHandle::new(Store::open_in_memory().unwrap());
        seed(&db, "t3_misc", "general thoughts", "I have opinions about things").await;
        grouper(&db).run(100).await.unwrap();

        let insights = db.call(|s| s.list_insights(None, 100)).await.unwrap();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].theme, crate::taxonomy::CATCH_ALL_THEME);
    }

    #[tokio::test]
    async fn test_pending_items_are_not_grouped() {
        let db = DbHandle::new(Store::open_in_memory().unwrap());
        let mut d = draft("t3_cold", "upload problem", "x");
        d.score = Some(0); // below threshold, stays PENDING
        db.call(move |s| s.upsert_feedback(&d, 2).map(|_| ()))
            .await
            .unwrap();

        let report = grouper(&db).run(100).await.unwrap();
        assert_eq!(report.items_processed, 0);
        assert!(db.call(|s| s.list_insights(None, 10)).await.unwrap().is_empty());
    }
}
