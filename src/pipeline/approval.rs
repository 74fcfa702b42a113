//! Approval gate & publisher.
//!
//! Two independent signals gate publishing: an explicit operator approval
//! (sufficient on its own) and an optional community crowd-vote on a posted
//! reply, polled on the refresher's cadence. Publishing is idempotent at
//! every step — re-invoking a publish operation returns the existing
//! artifact — and the final merge fires at most once per insight.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::db::DbHandle;
use crate::errors::{PipelineError, VcsError};
use crate::models::{
    FeedbackItem, Insight, InsightStatus, InsightSummary, LogLevel, PatchPlan, RepoConfig,
    TicketSpec,
};
use crate::pipeline::codegen::CodeGenerator;
use crate::plan;
use crate::sources::FeedbackSource;
use crate::vcs::{PrPayload, SourceControl, TicketPayload};

#[derive(Debug, Clone, Serialize)]
pub struct TicketReport {
    pub insight_id: i64,
    pub ticket_number: Option<i64>,
    pub ticket_url: String,
    /// False when the ticket already existed and the call was a no-op.
    pub created: bool,
    pub plan_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrReport {
    pub insight_id: i64,
    pub pr_number: i64,
    pub pr_url: String,
    pub branch: String,
    pub created: bool,
    pub files_committed: usize,
    pub tier: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommunityReport {
    pub insight_id: i64,
    pub reply_id: String,
    pub requested: bool,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct CommunityPollReport {
    pub checked: usize,
    pub updated: usize,
    pub approved: usize,
    pub merged: usize,
}

pub struct ApprovalGate {
    db: DbHandle,
    config: Arc<AppConfig>,
    source: Arc<dyn FeedbackSource>,
    vcs: Arc<dyn SourceControl>,
    generator: CodeGenerator,
}

impl ApprovalGate {
    pub fn new(
        db: DbHandle,
        config: Arc<AppConfig>,
        source: Arc<dyn FeedbackSource>,
        vcs: Arc<dyn SourceControl>,
        generator: CodeGenerator,
    ) -> Self {
        Self {
            db,
            config,
            source,
            vcs,
            generator,
        }
    }

    // ── Human approval ────────────────────────────────────────────────

    /// Operator approval: sufficient on its own to authorize publishing.
    pub async fn approve(
        &self,
        insight_id: i64,
        comment: Option<String>,
    ) -> Result<Insight, PipelineError> {
        self.require_insight(insight_id).await?;
        let insight = self
            .db
            .call(move |db| {
                let insight = db.update_insight_status(insight_id, InsightStatus::Approved)?;
                db.append_log(
                    insight_id,
                    LogLevel::Info,
                    "approved by operator",
                    Some("insight_approved"),
                    serde_json::json!({ "comment": comment }),
                )?;
                Ok(insight)
            })
            .await?;
        Ok(insight)
    }

    /// Explicit rejection closes the insight; CLOSED is the only way out
    /// of the pipeline, insights are never auto-deleted.
    pub async fn reject(
        &self,
        insight_id: i64,
        comment: Option<String>,
    ) -> Result<Insight, PipelineError> {
        self.require_insight(insight_id).await?;
        let insight = self
            .db
            .call(move |db| {
                let insight = db.update_insight_status(insight_id, InsightStatus::Closed)?;
                db.append_log(
                    insight_id,
                    LogLevel::Info,
                    "rejected by operator",
                    Some("insight_rejected"),
                    serde_json::json!({ "comment": comment }),
                )?;
                Ok(insight)
            })
            .await?;
        Ok(insight)
    }

    // ── Ticket publication ────────────────────────────────────────────

    pub async fn create_ticket(&self, insight_id: i64) -> Result<TicketReport, PipelineError> {
        let insight = self.require_insight(insight_id).await?;
        let members = self.require_members(insight_id).await?;
        let repo = self.require_repo_config().await?;

        // Idempotency: an existing ticket wins, wherever it is recorded.
        if let Some(url) = existing_ticket_url(&insight, &members) {
            return Ok(TicketReport {
                insight_id,
                ticket_number: insight.ticket_number,
                ticket_url: url,
                created: false,
                plan_path: None,
            });
        }

        let ticket = insight
            .ticket
            .clone()
            .ok_or_else(|| PipelineError::Validation("no ticket synthesized yet; run analysis first".into()))?;
        ticket.validate().map_err(PipelineError::Validation)?;

        if repo.require_approval && insight.status != InsightStatus::Approved {
            return Err(PipelineError::Validation(
                "repository requires operator approval before publishing".into(),
            ));
        }

        let summary = insight.summary.clone().unwrap_or_else(|| InsightSummary {
            theme: insight.theme.clone(),
            severity: ticket.priority,
            confidence: 0.5,
            user_impact: "Impact analysis pending".into(),
            evidence_count: insight.entry_count,
        });

        let primary = &members[0];
        let mut body = render_ticket_body(&ticket, &members);
        let mut plan_repo_path = None;

        if self.config.enable_plan_artifacts {
            let content = plan::build_plan(primary, &ticket, &summary, &members);
            let repo_path =
                self.config
                    .plan_repo_path(&primary.external_id, None, &repo.owner, &repo.repo);
            match plan::save_plan(&content, &self.config.plan_dir, &primary.external_id) {
                Ok(local) => info!(path = %local.display(), "plan artifact written"),
                // Additive step: a failed plan write never blocks the ticket.
                Err(e) => warn!(error = %e, "failed to write local plan artifact"),
            }
            let snippet: String = content.lines().take(5).collect::<Vec<_>>().join("\n");
            body.push_str(&format!(
                "\n\n## Plan-of-Attack\n{}\n\nFull plan stored at `{}`",
                snippet, repo_path
            ));
            plan_repo_path = Some(repo_path);
        }

        let created = match self
            .vcs
            .open_ticket(
                &repo,
                &TicketPayload {
                    title: ticket.title.clone(),
                    body,
                    labels: ticket.labels.clone(),
                },
            )
            .await
        {
            Ok(created) => created,
            Err(e) => {
                // Unrecoverable publish failure: members drop to FAILED
                // for manual intervention, with full context logged.
                let msg = e.to_string();
                self.db
                    .call(move |db| {
                        let ids: Vec<i64> = db
                            .list_feedback_for_insight(insight_id)?
                            .iter()
                            .map(|i| i.id)
                            .collect();
                        for id in ids {
                            db.mark_feedback_failed(id)?;
                        }
                        db.append_log(
                            insight_id,
                            LogLevel::Error,
                            &format!("ticket publication failed: {}", msg),
                            Some("ticket_created"),
                            serde_json::json!({}),
                        )?;
                        Ok(())
                    })
                    .await?;
                return Err(e.into());
            }
        };

        let url = created.url.clone();
        let number = created.number;
        let plan_path = plan_repo_path.clone();
        self.db
            .call(move |db| {
                db.update_insight_ticket(insight_id, number, &url)?;
                db.mark_processed_for_insight(insight_id, &url, plan_path.as_deref(), None)?;
                db.update_insight_status(insight_id, InsightStatus::InProgress)?;
                db.append_log(
                    insight_id,
                    LogLevel::Info,
                    &format!("created ticket #{}", number),
                    Some("ticket_created"),
                    serde_json::json!({ "ticket_url": url, "ticket_number": number }),
                )?;
                Ok(())
            })
            .await?;

        info!(insight_id, number, "ticket published");
        Ok(TicketReport {
            insight_id,
            ticket_number: Some(created.number),
            ticket_url: created.url,
            created: true,
            plan_path: plan_repo_path,
        })
    }

    // ── Pull request publication ──────────────────────────────────────

    /// Generate code for an insight's ticket and open a PR. Explicitly
    /// human-triggered; requires the ticket to exist already. Failures
    /// here never invalidate the ticket.
    pub async fn create_pr(&self, insight_id: i64) -> Result<PrReport, PipelineError> {
        let insight = self.require_insight(insight_id).await?;
        let members = self.require_members(insight_id).await?;
        let repo = self.require_repo_config().await?;

        let ticket_number = insight.ticket_number.ok_or_else(|| {
            PipelineError::Validation("no ticket created yet for this insight".into())
        })?;

        if let (Some(url), Some(number)) = (insight.pr_url.clone(), insight.pr_number) {
            return Ok(PrReport {
                insight_id,
                pr_number: number,
                pr_url: url,
                branch: branch_name(&members[0]),
                created: false,
                files_committed: 0,
                tier: None,
            });
        }

        let ticket = insight
            .ticket
            .clone()
            .ok_or_else(|| PipelineError::Validation("insight carries no ticket payload".into()))?;
        let patch_plan = insight.patch_plan.clone().unwrap_or_else(|| PatchPlan {
            summary: format!("Changes for: {}", ticket.title),
            files_impacted: vec![],
            change_outline: "To be determined from the repository tree".into(),
            risk_level: "medium".into(),
            test_plan: "Manual verification".into(),
        });

        let primary = &members[0];
        let branch = branch_name(primary);

        match self.vcs.create_branch(&repo, &branch).await {
            Ok(()) => {}
            Err(VcsError::BranchExists { .. }) => {
                info!(%branch, "branch already exists, reusing");
            }
            Err(e) => return Err(e.into()),
        }

        // A hanging clone must not wedge the insight in PROCESSING: bound
        // it and fall back to generating without a checkout.
        let workdir = tempfile_dir()?;
        let checkout = match self
            .vcs
            .clone_repo(
                &repo,
                &workdir.join("checkout"),
                Duration::from_secs(self.config.clone_timeout_secs),
            )
            .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "clone unavailable, generating without checkout");
                self.log_warning(insight_id, "clone unavailable", "create_pr").await?;
                None
            }
        };

        let changes = self
            .generator
            .generate(&ticket, &patch_plan, checkout.as_deref())
            .await
            .map_err(PipelineError::Other)?;

        let mut files_committed = 0;
        if self.config.enable_plan_artifacts {
            let summary = insight.summary.clone().unwrap_or_else(|| InsightSummary {
                theme: insight.theme.clone(),
                severity: ticket.priority,
                confidence: 0.5,
                user_impact: "Impact analysis pending".into(),
                evidence_count: insight.entry_count,
            });
            let plan_content = plan::build_plan(primary, &ticket, &summary, &members);
            let plan_path = self.config.plan_repo_path(
                &primary.external_id,
                Some(ticket_number),
                &repo.owner,
                &repo.repo,
            );
            if let Err(e) = self
                .vcs
                .upsert_file(
                    &repo,
                    &branch,
                    &plan_path,
                    &plan_content,
                    &format!("Add plan for {}", primary.external_id),
                )
                .await
            {
                warn!(error = %e, "failed to commit plan document");
            } else {
                files_committed += 1;
            }
        }

        for (path, content) in &changes.files {
            match self
                .vcs
                .upsert_file(
                    &repo,
                    &branch,
                    path,
                    content,
                    &format!("Implement: {}", ticket.title),
                )
                .await
            {
                Ok(_) => files_committed += 1,
                // Per-file failures are additive; the PR still opens with
                // whatever landed.
                Err(e) => warn!(%path, error = %e, "failed to commit generated file"),
            }
        }

        let pr_body = format!(
            "## Automated implementation\n\n**Ticket:** #{}\n**Source feedback:** {}\n\n\
             ### Files changed ({})\n{}\n\n### Generation tier\n`{}`",
            ticket_number,
            primary.permalink,
            changes.files.len(),
            changes
                .files
                .keys()
                .map(|f| format!("- `{}`", f))
                .collect::<Vec<_>>()
                .join("\n"),
            changes.tier,
        );

        let pr = self
            .vcs
            .open_pull_request(
                &repo,
                &PrPayload {
                    title: ticket.title.clone(),
                    body: pr_body,
                    head_branch: branch.clone(),
                    base_branch: repo.base_branch.clone(),
                },
            )
            .await?;

        let (url, number, tier) = (pr.url.clone(), pr.number, changes.tier.clone());
        self.db
            .call(move |db| {
                db.update_insight_pr(insight_id, number, &url)?;
                db.mark_processed_for_insight(
                    insight_id,
                    db.get_insight(insight_id)?
                        .and_then(|i| i.ticket_url)
                        .as_deref()
                        .unwrap_or(&url),
                    None,
                    Some(&url),
                )?;
                db.append_log(
                    insight_id,
                    LogLevel::Info,
                    &format!("opened PR #{}", number),
                    Some("pr_created"),
                    serde_json::json!({ "pr_url": url, "tier": tier }),
                )?;
                Ok(())
            })
            .await?;

        info!(insight_id, number = pr.number, tier = %changes.tier, "PR published");
        Ok(PrReport {
            insight_id,
            pr_number: pr.number,
            pr_url: pr.url,
            branch,
            created: true,
            files_committed,
            tier: Some(changes.tier),
        })
    }

    // ── Community approval ────────────────────────────────────────────

    /// Post a public PR summary as a reply on the primary feedback item.
    /// The reply's score is polled by `poll_community`; crossing the
    /// threshold merges the PR automatically.
    pub async fn ask_community(&self, insight_id: i64) -> Result<CommunityReport, PipelineError> {
        let insight = self.require_insight(insight_id).await?;
        let members = self.require_members(insight_id).await?;

        let (pr_url, pr_number) = match (insight.pr_url.clone(), insight.pr_number) {
            (Some(url), Some(number)) => (url, number),
            _ => {
                return Err(PipelineError::Validation(
                    "no PR created yet for this insight".into(),
                ));
            }
        };

        if insight.community_requested {
            return Ok(CommunityReport {
                insight_id,
                reply_id: insight.community_reply_id.unwrap_or_default(),
                requested: false,
            });
        }

        let primary = &members[0];
        let ticket_excerpt: String = insight
            .ticket
            .as_ref()
            .map(|t| t.problem_statement.chars().take(200).collect())
            .unwrap_or_else(|| insight.description.clone());
        let text = format!(
            "Hey! A fix for this is up for review: {}\n\n\
             **What it does:**\n{}\n\n\
             **Implementation:** PR #{}\n\n\
             Upvote this comment if you want it merged!",
            pr_url, ticket_excerpt, pr_number
        );

        let reply_id = self.source.post_reply(&primary.external_id, &text).await?;

        let reply = reply_id.clone();
        self.db
            .call(move |db| {
                db.record_community_request(insight_id, &reply)?;
                db.append_log(
                    insight_id,
                    LogLevel::Info,
                    "community approval requested",
                    Some("ask_community"),
                    serde_json::json!({ "reply_id": reply }),
                )?;
                Ok(())
            })
            .await?;

        Ok(CommunityReport {
            insight_id,
            reply_id,
            requested: true,
        })
    }

    /// Poll reply scores for insights awaiting community approval and fire
    /// the merge when the threshold is crossed. Runs on the refresher's
    /// cadence; already-approved insights are excluded by the query, and
    /// both the approval and the merge are latched, so repeated polls are
    /// no-ops.
    pub async fn poll_community(&self) -> Result<CommunityPollReport, PipelineError> {
        let pending = self
            .db
            .call(|db| db.list_pending_community_insights())
            .await?;
        let mut report = CommunityPollReport::default();

        for insight in pending {
            let Some(reply_id) = insight.community_reply_id.clone() else {
                continue;
            };
            let insight_id = insight.id;
            let members = self
                .db
                .call(move |db| db.list_feedback_for_insight(insight_id))
                .await?;
            let permalink = members
                .first()
                .map(|m| m.permalink.clone())
                .unwrap_or_default();

            report.checked += 1;
            let score = match self.source.fetch_score(&reply_id, &permalink).await {
                Ok(score) => score,
                Err(e) => {
                    // Retryable on the next poll; sub-state stays REQUESTED.
                    warn!(insight_id, error = %e, "community reply score lookup failed");
                    continue;
                }
            };

            self.db
                .call(move |db| db.record_community_score(insight_id, score))
                .await?;
            report.updated += 1;

            if score < self.config.min_score {
                continue;
            }

            // REQUESTED → APPROVED is latched; only the flipping call
            // proceeds to merge.
            let flipped = self.db.call(move |db| db.approve_community(insight_id)).await?;
            if !flipped {
                continue;
            }
            report.approved += 1;
            self.db
                .call(move |db| {
                    db.append_log(
                        insight_id,
                        LogLevel::Info,
                        &format!("community approved with score {}", score),
                        Some("community_approved"),
                        serde_json::json!({ "score": score }),
                    )
                    .map(|_| ())
                })
                .await?;

            if let Some(pr_number) = insight.pr_number {
                let repo = self.require_repo_config().await?;
                let merge_latched = self.db.call(move |db| db.mark_pr_merged(insight_id)).await?;
                if !merge_latched {
                    continue;
                }
                match self.vcs.merge_pr(&repo, pr_number).await {
                    Ok(()) => {
                        report.merged += 1;
                        self.db
                            .call(move |db| {
                                db.update_insight_status(insight_id, InsightStatus::Completed)?;
                                db.append_log(
                                    insight_id,
                                    LogLevel::Info,
                                    &format!("merged PR #{} after community approval", pr_number),
                                    Some("pr_merged"),
                                    serde_json::json!({ "pr_number": pr_number }),
                                )?;
                                Ok(())
                            })
                            .await?;
                    }
                    Err(e) => {
                        // The latch stays set: the merge will not be retried
                        // automatically, an operator has to step in.
                        error!(insight_id, pr_number, error = %e, "auto-merge failed");
                        let msg = e.to_string();
                        self.db
                            .call(move |db| {
                                db.append_log(
                                    insight_id,
                                    LogLevel::Error,
                                    &format!("auto-merge failed: {}", msg),
                                    Some("pr_merged"),
                                    serde_json::json!({ "pr_number": pr_number }),
                                )
                                .map(|_| ())
                            })
                            .await?;
                    }
                }
            }
        }

        Ok(report)
    }

    // ── Shared guards ─────────────────────────────────────────────────

    async fn require_insight(&self, insight_id: i64) -> Result<Insight, PipelineError> {
        self.db
            .call(move |db| db.get_insight(insight_id))
            .await?
            .ok_or(PipelineError::InsightNotFound { id: insight_id })
    }

    async fn require_members(&self, insight_id: i64) -> Result<Vec<FeedbackItem>, PipelineError> {
        let members = self
            .db
            .call(move |db| db.list_feedback_for_insight(insight_id))
            .await?;
        if members.is_empty() {
            return Err(PipelineError::Validation(format!(
                "insight {} has no member items",
                insight_id
            )));
        }
        Ok(members)
    }

    async fn require_repo_config(&self) -> Result<RepoConfig, PipelineError> {
        self.db
            .call(|db| db.default_repo_config())
            .await?
            .ok_or(PipelineError::NoRepoConfig)
    }

    async fn log_warning(
        &self,
        insight_id: i64,
        message: &str,
        step: &str,
    ) -> Result<(), PipelineError> {
        let (message, step) = (message.to_string(), step.to_string());
        self.db
            .call(move |db| {
                db.append_log(
                    insight_id,
                    LogLevel::Warning,
                    &message,
                    Some(&step),
                    serde_json::json!({}),
                )
                .map(|_| ())
            })
            .await?;
        Ok(())
    }
}

fn branch_name(primary: &FeedbackItem) -> String {
    format!("threadsmith/{}", primary.external_id)
}

fn existing_ticket_url(insight: &Insight, members: &[FeedbackItem]) -> Option<String> {
    if let Some(url) = &insight.ticket_url {
        return Some(url.clone());
    }
    members.iter().find_map(|m| m.ticket_url.clone())
}

fn tempfile_dir() -> Result<std::path::PathBuf, PipelineError> {
    let dir = std::env::temp_dir().join(format!("threadsmith-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir)
        .map_err(|e| PipelineError::Other(anyhow::anyhow!("failed to create workdir: {}", e)))?;
    Ok(dir)
}

/// Render the published ticket body: problem, behavior, acceptance
/// criteria, and a quoted evidence section linking every member item.
pub fn render_ticket_body(ticket: &TicketSpec, members: &[FeedbackItem]) -> String {
    let mut out = format!("## Problem\n{}\n", ticket.problem_statement);

    if !ticket.steps_to_reproduce.is_empty() {
        out.push_str("\n## Steps to Reproduce\n");
        for (i, step) in ticket.steps_to_reproduce.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, step));
        }
    }

    out.push_str(&format!("\n## Expected Behavior\n{}\n", ticket.expected_behavior));
    if let Some(actual) = &ticket.actual_behavior {
        out.push_str(&format!("\n## Actual Behavior\n{}\n", actual));
    }
    if let Some(cause) = &ticket.suspected_root_cause {
        out.push_str(&format!("\n## Suspected Root Cause\n{}\n", cause));
    }
    if !ticket.suggested_fix_steps.is_empty() {
        out.push_str("\n## Suggested Fix\n");
        for step in &ticket.suggested_fix_steps {
            out.push_str(&format!("- {}\n", step));
        }
    }

    out.push_str("\n## Acceptance Criteria\n");
    for criterion in &ticket.acceptance_criteria {
        out.push_str(&format!("- [ ] {}\n", criterion));
    }

    out.push_str("\n## Evidence\n");
    for member in members {
        let quote: String = member
            .title
            .clone()
            .unwrap_or_else(|| member.body.clone())
            .chars()
            .take(200)
            .collect();
        out.push_str(&format!(
            "> {}\n> — [{} on {}]({}) ({} points)\n\n",
            quote,
            member.author,
            member.forum,
            member.permalink,
            member.score.unwrap_or(0)
        ));
    }

    out.push_str(&format!(
        "---\nPriority: **{}** | {} supporting reports",
        ticket.priority.as_str(),
        members.len()
    ));
    out
}
