use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, params};

use crate::models::*;

/// Async-safe handle to the pipeline store.
///
/// Wraps `Store` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Store>>,
}

impl DbHandle {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Run a closure with access to the store on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Store) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store
                .lock()
                .map_err(|e| anyhow::anyhow!("store lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("store task panicked")?
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing and demo runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS insights (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    theme TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    entry_count INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'pending',
                    priority TEXT,
                    summary_json TEXT,
                    ticket_json TEXT,
                    patch_plan_json TEXT,
                    ticket_number INTEGER,
                    ticket_url TEXT,
                    pr_number INTEGER,
                    pr_url TEXT,
                    community_requested INTEGER NOT NULL DEFAULT 0,
                    community_reply_id TEXT,
                    community_reply_score INTEGER NOT NULL DEFAULT 0,
                    community_approved INTEGER NOT NULL DEFAULT 0,
                    community_approved_at TEXT,
                    pr_merged INTEGER NOT NULL DEFAULT 0,
                    approved_at TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS feedback_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    external_id TEXT NOT NULL UNIQUE,
                    kind TEXT NOT NULL DEFAULT 'post',
                    title TEXT,
                    body TEXT NOT NULL DEFAULT '',
                    author TEXT NOT NULL DEFAULT '',
                    forum TEXT NOT NULL DEFAULT '',
                    permalink TEXT NOT NULL DEFAULT '',
                    score INTEGER,
                    num_comments INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'pending',
                    last_score_check_at TEXT,
                    processed_at TEXT,
                    ticket_url TEXT,
                    pr_url TEXT,
                    plan_path TEXT,
                    insight_id INTEGER REFERENCES insights(id),
                    created_at TEXT NOT NULL,
                    source_created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS execution_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    insight_id INTEGER NOT NULL REFERENCES insights(id),
                    level TEXT NOT NULL DEFAULT 'info',
                    message TEXT NOT NULL DEFAULT '',
                    step_name TEXT,
                    metadata TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS repo_configs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner TEXT NOT NULL,
                    repo TEXT NOT NULL,
                    base_branch TEXT NOT NULL DEFAULT 'main',
                    auto_create_tickets INTEGER NOT NULL DEFAULT 0,
                    auto_create_prs INTEGER NOT NULL DEFAULT 0,
                    require_approval INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE(owner, repo)
                );

                CREATE INDEX IF NOT EXISTS idx_feedback_status ON feedback_items(status);
                CREATE INDEX IF NOT EXISTS idx_feedback_insight ON feedback_items(insight_id);
                CREATE INDEX IF NOT EXISTS idx_insights_status ON insights(status);
                CREATE INDEX IF NOT EXISTS idx_logs_insight ON execution_logs(insight_id);
                CREATE INDEX IF NOT EXISTS idx_insights_community
                    ON insights(community_requested, community_approved);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Feedback items ────────────────────────────────────────────────

    /// Insert or update a feedback item keyed on its external identifier.
    ///
    /// Re-ingesting the same external item is a no-op with respect to row
    /// count, and the persisted status never regresses past PENDING
    /// (see `resolve_ingest_status`). Returns the stored item and whether a
    /// new row was created.
    pub fn upsert_feedback(
        &self,
        draft: &FeedbackDraft,
        min_score: i64,
    ) -> Result<(FeedbackItem, bool)> {
        let now = now_rfc3339();
        let candidate = status_for_score(draft.score, min_score);

        if let Some(existing) = self.get_feedback_by_external_id(&draft.external_id)? {
            let status = resolve_ingest_status(Some(existing.status), candidate);
            self.conn
                .execute(
                    "UPDATE feedback_items
                     SET title = ?1, body = ?2, author = ?3, forum = ?4, permalink = ?5,
                         num_comments = ?6, status = ?7
                     WHERE id = ?8",
                    params![
                        draft.title,
                        draft.body,
                        draft.author,
                        draft.forum,
                        draft.permalink,
                        draft.num_comments,
                        status.as_str(),
                        existing.id
                    ],
                )
                .context("Failed to update feedback item")?;
            if draft.score.is_some() {
                self.conn
                    .execute(
                        "UPDATE feedback_items SET score = ?1, last_score_check_at = ?2 WHERE id = ?3",
                        params![draft.score, now, existing.id],
                    )
                    .context("Failed to update feedback score")?;
            }
            let item = self
                .get_feedback(existing.id)?
                .context("Feedback item not found after update")?;
            return Ok((item, false));
        }

        let last_check = draft.score.map(|_| now.clone());
        self.conn
            .execute(
                "INSERT INTO feedback_items
                 (external_id, kind, title, body, author, forum, permalink, score, num_comments,
                  status, last_score_check_at, created_at, source_created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    draft.external_id,
                    draft.kind.as_str(),
                    draft.title,
                    draft.body,
                    draft.author,
                    draft.forum,
                    draft.permalink,
                    draft.score,
                    draft.num_comments,
                    candidate.as_str(),
                    last_check,
                    now,
                    draft.source_created_at
                ],
            )
            .context("Failed to insert feedback item")?;
        let id = self.conn.last_insert_rowid();
        let item = self
            .get_feedback(id)?
            .context("Feedback item not found after insert")?;
        Ok((item, true))
    }

    pub fn get_feedback(&self, id: i64) -> Result<Option<FeedbackItem>> {
        self.query_one_feedback("WHERE id = ?1", params![id])
    }

    pub fn get_feedback_by_external_id(&self, external_id: &str) -> Result<Option<FeedbackItem>> {
        self.query_one_feedback("WHERE external_id = ?1", params![external_id])
    }

    pub fn list_feedback(
        &self,
        status: Option<FeedbackStatus>,
        limit: i64,
    ) -> Result<Vec<FeedbackItem>> {
        match status {
            Some(s) => self.query_feedback(
                "WHERE status = ?1 ORDER BY id LIMIT ?2",
                params![s.as_str(), limit],
            ),
            None => self.query_feedback("ORDER BY id LIMIT ?1", params![limit]),
        }
    }

    pub fn list_feedback_for_insight(&self, insight_id: i64) -> Result<Vec<FeedbackItem>> {
        self.query_feedback("WHERE insight_id = ?1 ORDER BY id", params![insight_id])
    }

    /// READY items that have not produced a ticket yet — the grouper's input.
    pub fn list_claimable_feedback(&self, limit: i64) -> Result<Vec<FeedbackItem>> {
        self.query_feedback(
            "WHERE status = 'ready' AND ticket_url IS NULL ORDER BY id LIMIT ?1",
            params![limit],
        )
    }

    /// Exclusive READY→PROCESSING claim. The conditional update makes the
    /// transition atomic with respect to concurrent claimers: exactly one
    /// caller observes an affected row; everyone else gets `None`.
    pub fn claim_feedback(&self, id: i64) -> Result<Option<FeedbackItem>> {
        let changed = self
            .conn
            .execute(
                "UPDATE feedback_items SET status = 'processing'
                 WHERE id = ?1 AND status = 'ready' AND ticket_url IS NULL",
                params![id],
            )
            .context("Failed to claim feedback item")?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_feedback(id)
    }

    /// Stamp a score check. The check timestamp is always advanced; score
    /// and status change only when the source actually returned a score.
    pub fn record_score_check(
        &self,
        id: i64,
        score: Option<i64>,
        new_status: Option<FeedbackStatus>,
    ) -> Result<FeedbackItem> {
        let now = now_rfc3339();
        self.conn
            .execute(
                "UPDATE feedback_items SET last_score_check_at = ?1 WHERE id = ?2",
                params![now, id],
            )
            .context("Failed to stamp score check")?;
        if let Some(score) = score {
            self.conn
                .execute(
                    "UPDATE feedback_items SET score = ?1 WHERE id = ?2",
                    params![score, id],
                )
                .context("Failed to update score")?;
        }
        if let Some(status) = new_status {
            self.conn
                .execute(
                    "UPDATE feedback_items SET status = ?1 WHERE id = ?2",
                    params![status.as_str(), id],
                )
                .context("Failed to update status")?;
        }
        self.get_feedback(id)?
            .context("Feedback item not found after score check")
    }

    pub fn assign_feedback_to_insight(&self, id: i64, insight_id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE feedback_items SET insight_id = ?1 WHERE id = ?2",
                params![insight_id, id],
            )
            .context("Failed to link feedback item to insight")?;
        Ok(())
    }

    /// Terminal FAILED transition. Only legal from PROCESSING, per the
    /// state machine; the conditional keeps a concurrent success from
    /// being clobbered. Returns whether the transition happened.
    pub fn mark_feedback_failed(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE feedback_items SET status = 'failed', processed_at = ?1
                 WHERE id = ?2 AND status = 'processing'",
                params![now_rfc3339(), id],
            )
            .context("Failed to mark feedback item failed")?;
        Ok(changed > 0)
    }

    /// Mark all items linked to an insight PROCESSED and stamp the produced
    /// artifacts on them. Returns the number of rows updated.
    pub fn mark_processed_for_insight(
        &self,
        insight_id: i64,
        ticket_url: &str,
        plan_path: Option<&str>,
        pr_url: Option<&str>,
    ) -> Result<usize> {
        let now = now_rfc3339();
        let count = self
            .conn
            .execute(
                "UPDATE feedback_items
                 SET status = 'processed', processed_at = ?1, ticket_url = ?2,
                     plan_path = COALESCE(?3, plan_path), pr_url = COALESCE(?4, pr_url)
                 WHERE insight_id = ?5",
                params![now, ticket_url, plan_path, pr_url, insight_id],
            )
            .context("Failed to mark insight items processed")?;
        Ok(count)
    }

    fn query_one_feedback(
        &self,
        filter: &str,
        args: impl rusqlite::Params,
    ) -> Result<Option<FeedbackItem>> {
        let mut items = self.query_feedback(filter, args)?;
        Ok(if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        })
    }

    fn query_feedback(
        &self,
        filter: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<FeedbackItem>> {
        let sql = format!(
            "SELECT id, external_id, kind, title, body, author, forum, permalink, score,
                    num_comments, status, last_score_check_at, processed_at, ticket_url,
                    pr_url, plan_path, insight_id, created_at, source_created_at
             FROM feedback_items {}",
            filter
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare feedback query")?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(FeedbackRow {
                    id: row.get(0)?,
                    external_id: row.get(1)?,
                    kind: row.get(2)?,
                    title: row.get(3)?,
                    body: row.get(4)?,
                    author: row.get(5)?,
                    forum: row.get(6)?,
                    permalink: row.get(7)?,
                    score: row.get(8)?,
                    num_comments: row.get(9)?,
                    status: row.get(10)?,
                    last_score_check_at: row.get(11)?,
                    processed_at: row.get(12)?,
                    ticket_url: row.get(13)?,
                    pr_url: row.get(14)?,
                    plan_path: row.get(15)?,
                    insight_id: row.get(16)?,
                    created_at: row.get(17)?,
                    source_created_at: row.get(18)?,
                })
            })
            .context("Failed to query feedback items")?;
        let mut items = Vec::new();
        for row in rows {
            let r = row.context("Failed to read feedback row")?;
            items.push(r.into_item()?);
        }
        Ok(items)
    }

    // ── Insights ──────────────────────────────────────────────────────

    /// Create a new themed insight. An insight with zero members is invalid,
    /// so `entry_count` must be at least one.
    pub fn create_insight(
        &self,
        theme: &str,
        description: &str,
        entry_count: i64,
    ) -> Result<Insight> {
        if entry_count < 1 {
            anyhow::bail!("refusing to create insight '{}' with zero members", theme);
        }
        let now = now_rfc3339();
        self.conn
            .execute(
                "INSERT INTO insights (theme, description, entry_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![theme, description, entry_count, now],
            )
            .context("Failed to insert insight")?;
        let id = self.conn.last_insert_rowid();
        self.get_insight(id)?
            .context("Insight not found after insert")
    }

    pub fn get_insight(&self, id: i64) -> Result<Option<Insight>> {
        self.query_one_insight("WHERE id = ?1", params![id])
    }

    /// Earliest-created open insight for a theme. CLOSED insights never
    /// receive new members; ties between candidates go to the lowest id,
    /// which favors consolidation over fragmentation.
    pub fn find_open_insight_by_theme(&self, theme: &str) -> Result<Option<Insight>> {
        self.query_one_insight(
            "WHERE theme = ?1 AND status != 'closed' ORDER BY id ASC LIMIT 1",
            params![theme],
        )
    }

    pub fn list_insights(
        &self,
        status: Option<InsightStatus>,
        limit: i64,
    ) -> Result<Vec<Insight>> {
        match status {
            Some(s) => self.query_insights(
                "WHERE status = ?1 ORDER BY id LIMIT ?2",
                params![s.as_str(), limit],
            ),
            None => self.query_insights("ORDER BY id LIMIT ?1", params![limit]),
        }
    }

    /// Insights awaiting a community-approval threshold check.
    /// Already-approved insights are excluded so the merge fires at most once.
    pub fn list_pending_community_insights(&self) -> Result<Vec<Insight>> {
        self.query_insights(
            "WHERE community_requested = 1 AND community_approved = 0 ORDER BY id",
            params![],
        )
    }

    /// Add newly grouped members to an insight, refreshing its description.
    pub fn add_insight_entries(&self, id: i64, added: i64, description: &str) -> Result<Insight> {
        self.conn
            .execute(
                "UPDATE insights
                 SET entry_count = entry_count + ?1, description = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![added, description, now_rfc3339(), id],
            )
            .context("Failed to update insight entry count")?;
        self.get_insight(id)?
            .context("Insight not found after entry update")
    }

    /// Number of feedback items actually linked to the insight. The
    /// `entry_count` column must always agree with this.
    pub fn linked_entry_count(&self, insight_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM feedback_items WHERE insight_id = ?1",
                params![insight_id],
                |row| row.get(0),
            )
            .context("Failed to count linked feedback items")
    }

    pub fn update_insight_status(&self, id: i64, status: InsightStatus) -> Result<Insight> {
        let now = now_rfc3339();
        if status == InsightStatus::Approved {
            self.conn
                .execute(
                    "UPDATE insights SET status = ?1, approved_at = ?2, updated_at = ?2 WHERE id = ?3",
                    params![status.as_str(), now, id],
                )
                .context("Failed to update insight status")?;
        } else {
            self.conn
                .execute(
                    "UPDATE insights SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![status.as_str(), now, id],
                )
                .context("Failed to update insight status")?;
        }
        self.get_insight(id)?
            .context("Insight not found after status update")
    }

    /// Conditional PENDING→ANALYZING claim for the synthesizer, mirroring
    /// the exclusive item claim. Returns false if another run got there first.
    pub fn claim_insight_for_analysis(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE insights SET status = 'analyzing', updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![now_rfc3339(), id],
            )
            .context("Failed to claim insight for analysis")?;
        Ok(changed > 0)
    }

    pub fn update_insight_analysis(
        &self,
        id: i64,
        summary: &InsightSummary,
        ticket: &TicketSpec,
        patch_plan: &PatchPlan,
    ) -> Result<Insight> {
        self.conn
            .execute(
                "UPDATE insights
                 SET summary_json = ?1, ticket_json = ?2, patch_plan_json = ?3,
                     priority = ?4, status = 'ready', updated_at = ?5
                 WHERE id = ?6",
                params![
                    serde_json::to_string(summary)?,
                    serde_json::to_string(ticket)?,
                    serde_json::to_string(patch_plan)?,
                    ticket.priority.as_str(),
                    now_rfc3339(),
                    id
                ],
            )
            .context("Failed to store insight analysis")?;
        self.get_insight(id)?
            .context("Insight not found after analysis update")
    }

    pub fn update_insight_ticket(&self, id: i64, number: i64, url: &str) -> Result<Insight> {
        self.conn
            .execute(
                "UPDATE insights SET ticket_number = ?1, ticket_url = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![number, url, now_rfc3339(), id],
            )
            .context("Failed to store ticket info")?;
        self.get_insight(id)?
            .context("Insight not found after ticket update")
    }

    pub fn update_insight_pr(&self, id: i64, number: i64, url: &str) -> Result<Insight> {
        self.conn
            .execute(
                "UPDATE insights SET pr_number = ?1, pr_url = ?2, updated_at = ?3 WHERE id = ?4",
                params![number, url, now_rfc3339(), id],
            )
            .context("Failed to store PR info")?;
        self.get_insight(id)?
            .context("Insight not found after PR update")
    }

    pub fn record_community_request(&self, id: i64, reply_id: &str) -> Result<Insight> {
        self.conn
            .execute(
                "UPDATE insights
                 SET community_requested = 1, community_reply_id = ?1,
                     community_reply_score = 0, updated_at = ?2
                 WHERE id = ?3",
                params![reply_id, now_rfc3339(), id],
            )
            .context("Failed to record community request")?;
        self.get_insight(id)?
            .context("Insight not found after community request")
    }

    pub fn record_community_score(&self, id: i64, score: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE insights SET community_reply_score = ?1, updated_at = ?2 WHERE id = ?3",
                params![score, now_rfc3339(), id],
            )
            .context("Failed to record community reply score")?;
        Ok(())
    }

    /// Flip the community-approved latch. Conditional on the latch being
    /// unset, so a second threshold crossing is a no-op; returns whether
    /// this call performed the flip.
    pub fn approve_community(&self, id: i64) -> Result<bool> {
        let now = now_rfc3339();
        let changed = self
            .conn
            .execute(
                "UPDATE insights
                 SET community_approved = 1, community_approved_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND community_approved = 0",
                params![now, id],
            )
            .context("Failed to approve community gate")?;
        Ok(changed > 0)
    }

    /// Latch the merge action. Returns false if the PR was already merged
    /// by a previous invocation.
    pub fn mark_pr_merged(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE insights SET pr_merged = 1, updated_at = ?1
                 WHERE id = ?2 AND pr_merged = 0",
                params![now_rfc3339(), id],
            )
            .context("Failed to mark PR merged")?;
        Ok(changed > 0)
    }

    fn query_one_insight(
        &self,
        filter: &str,
        args: impl rusqlite::Params,
    ) -> Result<Option<Insight>> {
        let mut insights = self.query_insights(filter, args)?;
        Ok(if insights.is_empty() {
            None
        } else {
            Some(insights.remove(0))
        })
    }

    fn query_insights(&self, filter: &str, args: impl rusqlite::Params) -> Result<Vec<Insight>> {
        let sql = format!(
            "SELECT id, theme, description, entry_count, status, priority, summary_json,
                    ticket_json, patch_plan_json, ticket_number, ticket_url, pr_number, pr_url,
                    community_requested, community_reply_id, community_reply_score,
                    community_approved, community_approved_at, pr_merged, approved_at,
                    created_at, updated_at
             FROM insights {}",
            filter
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare insight query")?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(InsightRow {
                    id: row.get(0)?,
                    theme: row.get(1)?,
                    description: row.get(2)?,
                    entry_count: row.get(3)?,
                    status: row.get(4)?,
                    priority: row.get(5)?,
                    summary_json: row.get(6)?,
                    ticket_json: row.get(7)?,
                    patch_plan_json: row.get(8)?,
                    ticket_number: row.get(9)?,
                    ticket_url: row.get(10)?,
                    pr_number: row.get(11)?,
                    pr_url: row.get(12)?,
                    community_requested: row.get(13)?,
                    community_reply_id: row.get(14)?,
                    community_reply_score: row.get(15)?,
                    community_approved: row.get(16)?,
                    community_approved_at: row.get(17)?,
                    pr_merged: row.get(18)?,
                    approved_at: row.get(19)?,
                    created_at: row.get(20)?,
                    updated_at: row.get(21)?,
                })
            })
            .context("Failed to query insights")?;
        let mut insights = Vec::new();
        for row in rows {
            let r = row.context("Failed to read insight row")?;
            insights.push(r.into_insight()?);
        }
        Ok(insights)
    }

    // ── Execution logs ────────────────────────────────────────────────

    /// Append an audit record. Entries are immutable once written — the
    /// store exposes no update or delete path for them.
    pub fn append_log(
        &self,
        insight_id: i64,
        level: LogLevel,
        message: &str,
        step_name: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<ExecutionLogEntry> {
        self.conn
            .execute(
                "INSERT INTO execution_logs (insight_id, level, message, step_name, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    insight_id,
                    level.as_str(),
                    message,
                    step_name,
                    metadata.to_string(),
                    now_rfc3339()
                ],
            )
            .context("Failed to append execution log")?;
        let id = self.conn.last_insert_rowid();
        self.get_log(id)?.context("Log entry not found after insert")
    }

    fn get_log(&self, id: i64) -> Result<Option<ExecutionLogEntry>> {
        let mut entries = self.query_logs("WHERE id = ?1", params![id])?;
        Ok(if entries.is_empty() {
            None
        } else {
            Some(entries.remove(0))
        })
    }

    pub fn list_logs(&self, insight_id: i64, limit: i64) -> Result<Vec<ExecutionLogEntry>> {
        self.query_logs(
            "WHERE insight_id = ?1 ORDER BY id DESC LIMIT ?2",
            params![insight_id, limit],
        )
    }

    fn query_logs(
        &self,
        filter: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<ExecutionLogEntry>> {
        let sql = format!(
            "SELECT id, insight_id, level, message, step_name, metadata, created_at
             FROM execution_logs {}",
            filter
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare log query")?;
        let rows = stmt
            .query_map(args, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .context("Failed to query execution logs")?;
        let mut entries = Vec::new();
        for row in rows {
            let (id, insight_id, level, message, step_name, metadata, created_at) =
                row.context("Failed to read log row")?;
            entries.push(ExecutionLogEntry {
                id,
                insight_id,
                level: LogLevel::from_str(&level).map_err(|e| anyhow::anyhow!(e))?,
                message,
                step_name,
                metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
                created_at,
            });
        }
        Ok(entries)
    }

    // ── Repo configs ──────────────────────────────────────────────────

    pub fn create_repo_config(
        &self,
        owner: &str,
        repo: &str,
        base_branch: &str,
        auto_create_tickets: bool,
        auto_create_prs: bool,
        require_approval: bool,
    ) -> Result<RepoConfig> {
        let now = now_rfc3339();
        self.conn
            .execute(
                "INSERT INTO repo_configs
                 (owner, repo, base_branch, auto_create_tickets, auto_create_prs,
                  require_approval, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    owner,
                    repo,
                    base_branch,
                    auto_create_tickets,
                    auto_create_prs,
                    require_approval,
                    now
                ],
            )
            .context("Failed to insert repo config")?;
        let id = self.conn.last_insert_rowid();
        self.get_repo_config(id)?
            .context("Repo config not found after insert")
    }

    pub fn get_repo_config(&self, id: i64) -> Result<Option<RepoConfig>> {
        let mut configs = self.query_repo_configs("WHERE id = ?1", params![id])?;
        Ok(if configs.is_empty() {
            None
        } else {
            Some(configs.remove(0))
        })
    }

    /// The collaborator target for this deployment. Single-target for now:
    /// the earliest-created config wins.
    pub fn default_repo_config(&self) -> Result<Option<RepoConfig>> {
        let mut configs = self.query_repo_configs("ORDER BY id ASC LIMIT 1", params![])?;
        Ok(if configs.is_empty() {
            None
        } else {
            Some(configs.remove(0))
        })
    }

    fn query_repo_configs(
        &self,
        filter: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<RepoConfig>> {
        let sql = format!(
            "SELECT id, owner, repo, base_branch, auto_create_tickets, auto_create_prs,
                    require_approval, created_at, updated_at
             FROM repo_configs {}",
            filter
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare repo config query")?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(RepoConfig {
                    id: row.get(0)?,
                    owner: row.get(1)?,
                    repo: row.get(2)?,
                    base_branch: row.get(3)?,
                    auto_create_tickets: row.get(4)?,
                    auto_create_prs: row.get(5)?,
                    require_approval: row.get(6)?,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            })
            .context("Failed to query repo configs")?;
        let mut configs = Vec::new();
        for row in rows {
            configs.push(row.context("Failed to read repo config row")?);
        }
        Ok(configs)
    }

    // ── Statistics ────────────────────────────────────────────────────

    pub fn status_counts(&self) -> Result<StatusCounts> {
        let mut feedback = HashMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM feedback_items GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row.context("Failed to read feedback count row")?;
            feedback.insert(status, count);
        }

        let mut insights = HashMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM insights GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row.context("Failed to read insight count row")?;
            insights.insert(status, count);
        }

        Ok(StatusCounts { feedback, insights })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusCounts {
    pub feedback: HashMap<String, i64>,
    pub insights: HashMap<String, i64>,
}

// Intermediate row structs: raw TEXT columns are parsed into enums and
// JSON payloads after rusqlite hands the row back, so type errors surface
// as anyhow errors instead of panics inside query_map.

struct FeedbackRow {
    id: i64,
    external_id: String,
    kind: String,
    title: Option<String>,
    body: String,
    author: String,
    forum: String,
    permalink: String,
    score: Option<i64>,
    num_comments: i64,
    status: String,
    last_score_check_at: Option<String>,
    processed_at: Option<String>,
    ticket_url: Option<String>,
    pr_url: Option<String>,
    plan_path: Option<String>,
    insight_id: Option<i64>,
    created_at: String,
    source_created_at: String,
}

impl FeedbackRow {
    fn into_item(self) -> Result<FeedbackItem> {
        Ok(FeedbackItem {
            id: self.id,
            external_id: self.external_id,
            kind: FeedbackKind::from_str(&self.kind).map_err(|e| anyhow::anyhow!(e))?,
            title: self.title,
            body: self.body,
            author: self.author,
            forum: self.forum,
            permalink: self.permalink,
            score: self.score,
            num_comments: self.num_comments,
            status: FeedbackStatus::from_str(&self.status).map_err(|e| anyhow::anyhow!(e))?,
            last_score_check_at: self.last_score_check_at,
            processed_at: self.processed_at,
            ticket_url: self.ticket_url,
            pr_url: self.pr_url,
            plan_path: self.plan_path,
            insight_id: self.insight_id,
            created_at: self.created_at,
            source_created_at: self.source_created_at,
        })
    }
}

struct InsightRow {
    id: i64,
    theme: String,
    description: String,
    entry_count: i64,
    status: String,
    priority: Option<String>,
    summary_json: Option<String>,
    ticket_json: Option<String>,
    patch_plan_json: Option<String>,
    ticket_number: Option<i64>,
    ticket_url: Option<String>,
    pr_number: Option<i64>,
    pr_url: Option<String>,
    community_requested: bool,
    community_reply_id: Option<String>,
    community_reply_score: i64,
    community_approved: bool,
    community_approved_at: Option<String>,
    pr_merged: bool,
    approved_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl InsightRow {
    fn into_insight(self) -> Result<Insight> {
        let summary = match self.summary_json {
            Some(raw) => Some(serde_json::from_str(&raw).context("Invalid summary payload")?),
            None => None,
        };
        let ticket = match self.ticket_json {
            Some(raw) => Some(serde_json::from_str(&raw).context("Invalid ticket payload")?),
            None => None,
        };
        let patch_plan = match self.patch_plan_json {
            Some(raw) => Some(serde_json::from_str(&raw).context("Invalid patch plan payload")?),
            None => None,
        };
        let priority = match self.priority {
            Some(raw) => Some(Priority::from_str(&raw).map_err(|e| anyhow::anyhow!(e))?),
            None => None,
        };
        Ok(Insight {
            id: self.id,
            theme: self.theme,
            description: self.description,
            entry_count: self.entry_count,
            status: InsightStatus::from_str(&self.status).map_err(|e| anyhow::anyhow!(e))?,
            priority,
            summary,
            ticket,
            patch_plan,
            ticket_number: self.ticket_number,
            ticket_url: self.ticket_url,
            pr_number: self.pr_number,
            pr_url: self.pr_url,
            community_requested: self.community_requested,
            community_reply_id: self.community_reply_id,
            community_reply_score: self.community_reply_score,
            community_approved: self.community_approved,
            community_approved_at: self.community_approved_at,
            pr_merged: self.pr_merged,
            approved_at: self.approved_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
