//! Feedback lifecycle pipeline.
//!
//! ## Module map
//!
//! ```text
//! ingest ──> refresh.rs   (PENDING → READY, score threshold + throttle)
//!              │
//!              v
//!            grouper.rs   (claim READY items, fold into themed insights)
//!              │
//!              v
//!            synthesize.rs (reasoner chain → summary/ticket/patch plan)
//!              │
//!              v
//!            codegen.rs    (tiered file generation over a bounded clone)
//!              │
//!              v
//!            approval.rs   (human + community gates, ticket/PR/merge)
//! ```
//!
//! All components communicate through the store; none call each other
//! directly. `Pipeline` wires them up once and backs every trigger
//! operation, each of which is independently idempotent.

pub mod approval;
pub mod codegen;
pub mod grouper;
pub mod refresh;
pub mod synthesize;

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::DbHandle;
use crate::errors::PipelineError;
use crate::models::InsightStatus;
use crate::reasoning::Reasoner;
use crate::sources::FeedbackSource;
use crate::taxonomy::Taxonomy;
use crate::vcs::SourceControl;

pub use approval::{ApprovalGate, CommunityPollReport, CommunityReport, PrReport, TicketReport};
pub use codegen::{CodeGenerator, GeneratedChanges};
pub use grouper::{GroupReport, InsightGrouper};
pub use refresh::{RefreshReport, ScoreRefresher};
pub use synthesize::{AnalyzeReport, IssueSynthesizer};

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub url: String,
    pub run_id: String,
    pub collected: usize,
    pub created: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct AutoLimits {
    pub entry_limit: i64,
    pub insight_limit: i64,
    pub ticket_limit: i64,
}

impl Default for AutoLimits {
    fn default() -> Self {
        Self {
            entry_limit: 200,
            insight_limit: 10,
            ticket_limit: 10,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct AutoReport {
    pub refresh: RefreshReport,
    pub community: CommunityPollReport,
    pub grouping: GroupReport,
    pub insights_analyzed: usize,
    pub tickets_created: usize,
    pub tickets_skipped: usize,
    pub created_ticket_urls: Vec<String>,
    pub created_pr_urls: Vec<String>,
    /// Populated instead of failing when a stage cannot run at all
    /// (e.g. no repository configured); earlier stages still count.
    pub error: Option<String>,
}

pub struct Pipeline {
    pub db: DbHandle,
    pub config: Arc<AppConfig>,
    pub source: Arc<dyn FeedbackSource>,
    pub refresher: ScoreRefresher,
    pub grouper: InsightGrouper,
    pub synthesizer: IssueSynthesizer,
    pub gate: ApprovalGate,
}

impl Pipeline {
    pub fn new(
        db: DbHandle,
        config: Arc<AppConfig>,
        taxonomy: Arc<Taxonomy>,
        source: Arc<dyn FeedbackSource>,
        reasoners: Vec<Arc<dyn Reasoner>>,
        vcs: Arc<dyn SourceControl>,
    ) -> Self {
        let refresher = ScoreRefresher::new(db.clone(), Arc::clone(&source), &config);
        let grouper = InsightGrouper::new(db.clone(), taxonomy);
        let synthesizer = IssueSynthesizer::new(db.clone(), reasoners.clone());
        let generator = CodeGenerator::new(Arc::clone(&config), reasoners);
        let gate = ApprovalGate::new(
            db.clone(),
            Arc::clone(&config),
            Arc::clone(&source),
            vcs,
            generator,
        );
        Self {
            db,
            config,
            source,
            refresher,
            grouper,
            synthesizer,
            gate,
        }
    }

    /// Ingest one thread from the feedback source. Upserts are keyed on
    /// the external identifier, so re-ingesting a thread never duplicates
    /// rows and never regresses item lifecycle state.
    pub async fn ingest_thread(
        &self,
        url: &str,
        max_items: usize,
    ) -> Result<IngestReport, PipelineError> {
        let drafts = self.source.fetch_thread(url, max_items).await?;
        let min_score = self.config.min_score;

        let mut created = 0;
        let mut updated = 0;
        let collected = drafts.len();
        for draft in drafts {
            let (_, was_created) = self
                .db
                .call(move |db| db.upsert_feedback(&draft, min_score))
                .await?;
            if was_created {
                created += 1;
            } else {
                updated += 1;
            }
        }

        Ok(IngestReport {
            url: url.to_string(),
            run_id: Uuid::new_v4().to_string(),
            collected,
            created,
            updated,
        })
    }

    /// One full scheduled pass: refresh scores, poll community approvals,
    /// group READY items, analyze pending insights, and publish tickets
    /// (and PRs, where the repo config allows automation). Designed to be
    /// invoked repeatedly by the external scheduler; every stage is
    /// idempotent and partial failure is reported, not propagated.
    pub async fn auto_process(&self, limits: AutoLimits) -> Result<AutoReport, PipelineError> {
        let mut report = AutoReport {
            refresh: self.refresher.refresh(limits.entry_limit).await?,
            community: self.gate.poll_community().await?,
            grouping: self.grouper.run(limits.entry_limit).await?,
            ..AutoReport::default()
        };

        let insight_limit = limits.insight_limit;
        let pending = self
            .db
            .call(move |db| db.list_insights(Some(InsightStatus::Pending), insight_limit))
            .await?;
        for insight in pending {
            match self.synthesizer.analyze(insight.id).await {
                Ok(r) if r.analyzed => report.insights_analyzed += 1,
                Ok(_) => {}
                Err(e) => warn!(insight_id = insight.id, error = %e, "analysis failed"),
            }
        }

        let repo = match self.db.call(|db| db.default_repo_config()).await? {
            Some(repo) => repo,
            None => {
                report.error = Some("no repository configured".to_string());
                return Ok(report);
            }
        };

        if !repo.auto_create_tickets {
            return Ok(report);
        }

        // Approved insights always qualify; READY ones only when the repo
        // does not demand operator approval.
        let ticket_limit = limits.ticket_limit;
        let mut candidates = self
            .db
            .call(move |db| db.list_insights(Some(InsightStatus::Approved), ticket_limit))
            .await?;
        if !repo.require_approval {
            let ticket_limit = limits.ticket_limit;
            candidates.extend(
                self.db
                    .call(move |db| db.list_insights(Some(InsightStatus::Ready), ticket_limit))
                    .await?,
            );
        }
        candidates.truncate(limits.ticket_limit as usize);

        for insight in candidates {
            match self.gate.create_ticket(insight.id).await {
                Ok(r) if r.created => {
                    report.tickets_created += 1;
                    report.created_ticket_urls.push(r.ticket_url);

                    if repo.auto_create_prs && self.config.enable_pr_automation {
                        match self.gate.create_pr(insight.id).await {
                            Ok(pr) if pr.created => report.created_pr_urls.push(pr.pr_url),
                            Ok(_) => {}
                            // PR failures never invalidate the ticket.
                            Err(e) => {
                                warn!(insight_id = insight.id, error = %e, "auto PR failed")
                            }
                        }
                    }
                }
                Ok(_) => report.tickets_skipped += 1,
                Err(e) => {
                    warn!(insight_id = insight.id, error = %e, "auto ticket failed");
                    report.tickets_skipped += 1;
                }
            }
        }

        Ok(report)
    }
}
