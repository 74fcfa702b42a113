//! Issue synthesizer.
//!
//! Turns one insight into a structured ticket (summary, ticket payload,
//! patch plan) by walking the ordered reasoner chain. The deterministic tier at
//! the end of the chain guarantees the pipeline never blocks on an
//! unavailable provider; if the chain is exhausted anyway, the insight
//! reverts to PENDING so the next run retries it.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::db::DbHandle;
use crate::errors::{PipelineError, ReasoningError};
use crate::models::{
    FeedbackItem, Insight, InsightStatus, InsightSummary, LogLevel, PatchPlan, TicketSpec,
};
use crate::reasoning::Reasoner;

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeReport {
    pub insight_id: i64,
    pub analyzed: bool,
    /// Which provider path produced the artifacts.
    pub provider: Option<String>,
    /// Set when the call was a no-op (already analyzed, analysis in flight).
    pub message: Option<String>,
}

pub struct IssueSynthesizer {
    db: DbHandle,
    reasoners: Vec<Arc<dyn Reasoner>>,
}

impl IssueSynthesizer {
    pub fn new(db: DbHandle, reasoners: Vec<Arc<dyn Reasoner>>) -> Self {
        Self { db, reasoners }
    }

    /// Analyze one insight. Idempotent: an already-analyzed insight returns
    /// its existing state, a concurrent analysis is reported and left alone.
    pub async fn analyze(&self, insight_id: i64) -> Result<AnalyzeReport, PipelineError> {
        let insight = self
            .db
            .call(move |db| db.get_insight(insight_id))
            .await?
            .ok_or(PipelineError::InsightNotFound { id: insight_id })?;

        if insight.ticket.is_some() && insight.status != InsightStatus::Pending {
            return Ok(AnalyzeReport {
                insight_id,
                analyzed: false,
                provider: None,
                message: Some("insight already analyzed".to_string()),
            });
        }

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

        let claimed = self
            .db
            .call(move |db| db.claim_insight_for_analysis(insight_id))
            .await?;
        if !claimed {
            return Ok(AnalyzeReport {
                insight_id,
                analyzed: false,
                provider: None,
                message: Some("analysis already in flight".to_string()),
            });
        }

        let mut last_err: Option<ReasoningError> = None;
        for reasoner in &self.reasoners {
            match self.attempt(reasoner.as_ref(), &insight, &members).await {
                Ok((summary, ticket, plan)) => {
                    let provider = reasoner.name();
                    let title = ticket.title.clone();
                    self.db
                        .call(move |db| {
                            db.update_insight_analysis(insight_id, &summary, &ticket, &plan)?;
                            db.append_log(
                                insight_id,
                                LogLevel::Info,
                                &format!("synthesized ticket '{}'", title),
                                Some("analysis"),
                                serde_json::json!({ "provider": provider }),
                            )?;
                            Ok(())
                        })
                        .await?;
                    info!(insight_id, provider, "insight analyzed");
                    return Ok(AnalyzeReport {
                        insight_id,
                        analyzed: true,
                        provider: Some(provider.to_string()),
                        message: None,
                    });
                }
                Err(e) => {
                    warn!(insight_id, provider = reasoner.name(), error = %e, "provider failed");
                    let provider = reasoner.name();
                    let msg = e.to_string();
                    self.db
                        .call(move |db| {
                            db.append_log(
                                insight_id,
                                LogLevel::Warning,
                                &format!("provider failed: {}", msg),
                                Some("analysis"),
                                serde_json::json!({ "provider": provider }),
                            )
                            .map(|_| ())
                        })
                        .await?;
                    last_err = Some(e);
                }
            }
        }

        // Chain exhausted: revert to PENDING so the next scheduled run
        // retries, and record the failure. Never silently dropped.
        self.db
            .call(move |db| {
                db.update_insight_status(insight_id, InsightStatus::Pending)?;
                db.append_log(
                    insight_id,
                    LogLevel::Error,
                    "all reasoning providers failed; insight left retryable",
                    Some("analysis"),
                    serde_json::json!({}),
                )?;
                Ok(())
            })
            .await?;
        Err(PipelineError::Reasoning(
            last_err.unwrap_or(ReasoningError::Unavailable),
        ))
    }

    async fn attempt(
        &self,
        reasoner: &dyn Reasoner,
        insight: &Insight,
        members: &[FeedbackItem],
    ) -> Result<(InsightSummary, TicketSpec, PatchPlan), ReasoningError> {
        let summary = reasoner.synthesize_summary(insight, members).await?;
        let ticket = reasoner.synthesize_ticket(insight, &summary, members).await?;
        ticket.validate().map_err(ReasoningError::Parse)?;
        let plan = reasoner.synthesize_patch_plan(&ticket).await?;
        Ok((summary, ticket, plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::models::{FeedbackDraft, FeedbackKind};
    use crate::reasoning::DeterministicReasoner;
    use async_trait::async_trait;

    struct FailingReasoner;

    #[async_trait]
    impl Reasoner for FailingReasoner {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn synthesize_summary(
            &self,
            _insight: &Insight,
            _members: &[FeedbackItem],
        ) -> Result<InsightSummary, ReasoningError> {
            Err(ReasoningError::QuotaExhausted)
        }
        async fn synthesize_ticket(
            &self,
            _insight: &Insight,
            _summary: &InsightSummary,
            _members: &[FeedbackItem],
        ) -> Result<TicketSpec, ReasoningError> {
            Err(ReasoningError::QuotaExhausted)
        }
        async fn synthesize_patch_plan(
            &self,
            _ticket: &TicketSpec,
        ) -> Result<PatchPlan, ReasoningError> {
            Err(ReasoningError::QuotaExhausted)
        }
        async fn generate_file_fix(
            &self,
            _path: &str,
            _current: &str,
            _ticket: &TicketSpec,
        ) -> Result<String, ReasoningError> {
            Err(ReasoningError::QuotaExhausted)
        }
    }

    async fn seed_insight(db: &DbHandle, with_member: bool) -> i64 {
        db.call(move |s| {
            let insight = s.create_insight("File Upload Issues", "Uploads failing", 1)?;
            if with_member {
                let draft = FeedbackDraft {
                    external_id: "t3_a".to_string(),
                    kind: FeedbackKind::Post,
                    title: Some("Uploads failing".to_string()),
                    body: "large files error".to_string(),
                    author: "a".to_string(),
                    forum: "f".to_string(),
                    permalink: "https://example.com/t3_a".to_string(),
                    score: Some(5),
                    num_comments: 0,
                    source_created_at: "2026-01-01T00:00:00Z".to_string(),
                };
                let (item, _) = s.upsert_feedback(&draft, 2)?;
                s.claim_feedback(item.id)?;
                s.assign_feedback_to_insight(item.id, insight.id)?;
            }
            Ok(insight.id)
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_deterministic_fallback_analyzes_insight() {
        let db = DbHandle::new(Store::open_in_memory().unwrap());
        let id = seed_insight(&db, true).await;
        let synthesizer =
            IssueSynthesizer::new(db.clone(), vec![Arc::new(DeterministicReasoner::new())]);

        let report = synthesizer.analyze(id).await.unwrap();
        assert!(report.analyzed);
        assert_eq!(report.provider.as_deref(), Some("deterministic"));

        let insight = db.call(move |s| s.get_insight(id)).await.unwrap().unwrap();
        assert_eq!(insight.status, InsightStatus::Ready);
        let ticket = insight.ticket.unwrap();
        assert!(ticket.validate().is_ok());
        assert_eq!(ticket.evidence.len(), 1);
        assert!(insight.patch_plan.is_some());
    }

    #[tokio::test]
    async fn test_chain_falls_through_to_next_tier() {
        let db = DbHandle::new(Store::open_in_memory().unwrap());
        let id = seed_insight(&db, true).await;
        let synthesizer = IssueSynthesizer::new(
            db.clone(),
            vec![Arc::new(FailingReasoner), Arc::new(DeterministicReasoner::new())],
        );

        let report = synthesizer.analyze(id).await.unwrap();
        assert!(report.analyzed);
        assert_eq!(report.provider.as_deref(), Some("deterministic"));

        // The primary tier's failure was logged, then the fallback's success.
        let logs = db.call(move |s| s.list_logs(id, 10)).await.unwrap();
        assert!(logs.iter().any(|l| l.level == LogLevel::Warning));
        assert!(logs.iter().any(|l| l.metadata["provider"] == "deterministic"));
    }

    #[tokio::test]
    async fn test_exhausted_chain_leaves_insight_retryable() {
        let db = DbHandle::new(Store::open_in_memory().unwrap());
        let id = seed_insight(&db, true).await;
        let synthesizer = IssueSynthesizer::new(db.clone(), vec![Arc::new(FailingReasoner)]);

        let err = synthesizer.analyze(id).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Reasoning(ReasoningError::QuotaExhausted)
        ));

        let insight = db.call(move |s| s.get_insight(id)).await.unwrap().unwrap();
        assert_eq!(insight.status, InsightStatus::Pending);
        let logs = db.call(move |s| s.list_logs(id, 10)).await.unwrap();
        assert!(logs.iter().any(|l| l.level == LogLevel::Error));
    }

    #[tokio::test]
    async fn test_empty_insight_is_a_validation_error() {
        let db = DbHandle::new(Store::open_in_memory().unwrap());
        let id = seed_insight(&db, false).await;
        let synthesizer =
            IssueSynthesizer::new(db.clone(), vec![Arc::new(DeterministicReasoner::new())]);
        let err = synthesizer.analyze(id).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reanalysis_is_a_noop() {
        let db = DbHandle::new(Store::open_in_memory().unwrap());
        let id = seed_insight(&db, true).await;
        let synthesizer =
            IssueSynthesizer::new(db.clone(), vec![Arc::new(DeterministicReasoner::new())]);
        synthesizer.analyze(id).await.unwrap();
        let second = synthesizer.analyze(id).await.unwrap();
        assert!(!second.analyzed);
        assert!(second.message.unwrap().contains("already analyzed"));
    }

    #[tokio::test]
    async fn test_missing_insight_is_not_found() {
        let db = DbHandle::new(Store::open_in_memory().unwrap());
        let synthesizer =
            IssueSynthesizer::new(db.clone(), vec![Arc::new(DeterministicReasoner::new())]);
        let err = synthesizer.analyze(404).await.unwrap_err();
        assert!(matches!(err, PipelineError::InsightNotFound { id: 404 }));
    }
}
