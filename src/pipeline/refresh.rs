//! Score refresher.
//!
//! Re-queries the feedback source for updated engagement scores and
//! advances items past the gating threshold. The recheck throttle is
//! enforced before any network call; per-item lookup failures leave the
//! item PENDING so the next scheduled run retries it.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::db::DbHandle;
use crate::models::{FeedbackStatus, status_for_score};
use crate::sources::FeedbackSource;

#[derive(Debug, Default, Clone, Serialize)]
pub struct RefreshReport {
    /// Items whose score was actually queried.
    pub checked: usize,
    /// Items that crossed the threshold and became READY.
    pub newly_ready: usize,
    /// Items inside the recheck window, skipped before any network call.
    pub skipped_recent: usize,
    /// Lookup failures; items stay PENDING.
    pub failed_lookups: usize,
}

/// Throttle rule: a score check is only performed once the refresh
/// interval has elapsed since the last one. An unparseable or missing
/// timestamp counts as due.
pub fn should_check(last_check_at: Option<&str>, interval_secs: i64, now: DateTime<Utc>) -> bool {
    match last_check_at.map(DateTime::parse_from_rfc3339) {
        Some(Ok(last)) => (now - last.with_timezone(&Utc)).num_seconds() >= interval_secs,
        _ => true,
    }
}

pub struct ScoreRefresher {
    db: DbHandle,
    source: Arc<dyn FeedbackSource>,
    min_score: i64,
    refresh_interval_secs: i64,
}

impl ScoreRefresher {
    pub fn new(db: DbHandle, source: Arc<dyn FeedbackSource>, config: &AppConfig) -> Self {
        Self {
            db,
            source,
            min_score: config.min_score,
            refresh_interval_secs: config.score_refresh_interval_secs,
        }
    }

    /// Refresh a batch of PENDING items. Safe to re-run at any time:
    /// READY and terminal items are never selected, and items inside the
    /// throttle window are counted but untouched.
    pub async fn refresh(&self, limit: i64) -> Result<RefreshReport> {
        let items = self
            .db
            .call(move |db| db.list_feedback(Some(FeedbackStatus::Pending), limit))
            .await?;

        let mut report = RefreshReport::default();
        let now = Utc::now();

        for item in items {
            if !should_check(
                item.last_score_check_at.as_deref(),
                self.refresh_interval_secs,
                now,
            ) {
                report.skipped_recent += 1;
                continue;
            }
            report.checked += 1;

            match self
                .source
                .fetch_score(&item.external_id, &item.permalink)
                .await
            {
                Ok(score) => {
                    let status = status_for_score(Some(score), self.min_score);
                    if status == FeedbackStatus::Ready {
                        report.newly_ready += 1;
                    }
                    let id = item.id;
                    self.db
                        .call(move |db| db.record_score_check(id, Some(score), Some(status)))
                        .await?;
                    debug!(external_id = %item.external_id, score, status = status.as_str(), "score refreshed");
                }
                Err(e) => {
                    // Transient or not, the item stays PENDING; only the
                    // processing phase may assign a terminal status. The
                    // check timestamp still advances so a flapping source
                    // does not get hammered every run.
                    warn!(external_id = %item.external_id, error = %e, "score lookup failed");
                    report.failed_lookups += 1;
                    let id = item.id;
                    self.db
                        .call(move |db| db.record_score_check(id, None, None))
                        .await?;
                }
            }
        }

        Ok(report)
    }
}
