use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of an ingested feedback item.
///
/// ```text
/// PENDING --[score >= threshold]--> READY --[claimed]--> PROCESSING
/// PROCESSING --> PROCESSED | FAILED | SKIPPED   (terminal)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Pending,
    Ready,
    Processing,
    Processed,
    Failed,
    Skipped,
}

impl FeedbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Failed | Self::Skipped)
    }
}

impl FromStr for FeedbackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid feedback status: {}", s)),
        }
    }
}

/// Status workflow for insights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsightStatus {
    Pending,
    Analyzing,
    Ready,
    Approved,
    InProgress,
    Completed,
    Closed,
}

impl InsightStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::Ready => "ready",
            Self::Approved => "approved",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Closed => "closed",
        }
    }
}

impl FromStr for InsightStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "analyzing" => Ok(Self::Analyzing),
            "ready" => Ok(Self::Ready),
            "approved" => Ok(Self::Approved),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Invalid insight status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Severity of an execution log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "debug" => Ok(Self::Debug),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

/// Whether the source item was a top-level post or a comment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Post,
    Comment,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
        }
    }
}

impl FromStr for FeedbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(Self::Post),
            "comment" => Ok(Self::Comment),
            _ => Err(format!("Invalid feedback kind: {}", s)),
        }
    }
}

/// One unit of ingested raw user feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub id: i64,
    /// Stable identifier assigned by the feedback source; unique per row.
    pub external_id: String,
    pub kind: FeedbackKind,
    pub title: Option<String>,
    pub body: String,
    pub author: String,
    /// Source forum identifier (e.g. the subreddit name).
    pub forum: String,
    pub permalink: String,
    pub score: Option<i64>,
    pub num_comments: i64,
    pub status: FeedbackStatus,
    pub last_score_check_at: Option<String>,
    pub processed_at: Option<String>,
    pub ticket_url: Option<String>,
    pub pr_url: Option<String>,
    pub plan_path: Option<String>,
    pub insight_id: Option<i64>,
    pub created_at: String,
    pub source_created_at: String,
}

/// Fields a feedback source hands back for one thread item, before the
/// store assigns identity and lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackDraft {
    pub external_id: String,
    pub kind: FeedbackKind,
    pub title: Option<String>,
    pub body: String,
    pub author: String,
    pub forum: String,
    pub permalink: String,
    pub score: Option<i64>,
    pub num_comments: i64,
    pub source_created_at: String,
}

/// Reasoning-provider summary of an insight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightSummary {
    pub theme: String,
    pub severity: Priority,
    pub confidence: f64,
    pub user_impact: String,
    pub evidence_count: i64,
}

/// Link from a ticket back to the feedback item that motivated it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceLink {
    pub external_id: String,
    pub permalink: String,
    pub excerpt: String,
}

/// Structured engineering ticket synthesized from an insight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketSpec {
    pub title: String,
    pub problem_statement: String,
    /// Ordered reproduction steps; empty for feature requests.
    #[serde(default)]
    pub steps_to_reproduce: Vec<String>,
    pub expected_behavior: String,
    #[serde(default)]
    pub actual_behavior: Option<String>,
    #[serde(default)]
    pub suspected_root_cause: Option<String>,
    #[serde(default)]
    pub suggested_fix_steps: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub labels: Vec<String>,
    pub priority: Priority,
    #[serde(default)]
    pub evidence: Vec<EvidenceLink>,
}

impl TicketSpec {
    /// Reject tickets that would produce an unusable issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("ticket title must not be empty".into());
        }
        if self.acceptance_criteria.is_empty() {
            return Err("ticket must carry at least one acceptance criterion".into());
        }
        Ok(())
    }
}

/// High-level plan for code changes, driving the code generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchPlan {
    pub summary: String,
    /// Candidate target file paths; may be empty, in which case the
    /// deterministic tier infers targets from the repository tree.
    #[serde(default)]
    pub files_impacted: Vec<String>,
    pub change_outline: String,
    pub risk_level: String,
    pub test_plan: String,
}

/// A theme grouping one or more feedback items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: i64,
    pub theme: String,
    pub description: String,
    pub entry_count: i64,
    pub status: InsightStatus,
    pub priority: Option<Priority>,
    pub summary: Option<InsightSummary>,
    pub ticket: Option<TicketSpec>,
    pub patch_plan: Option<PatchPlan>,
    pub ticket_number: Option<i64>,
    pub ticket_url: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_url: Option<String>,
    pub community_requested: bool,
    pub community_reply_id: Option<String>,
    pub community_reply_score: i64,
    pub community_approved: bool,
    pub community_approved_at: Option<String>,
    pub pr_merged: bool,
    pub approved_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Insight {
    /// Community approval sub-state: NOT_REQUESTED → REQUESTED → APPROVED.
    pub fn community_state(&self) -> CommunityState {
        if self.community_approved {
            CommunityState::Approved
        } else if self.community_requested {
            CommunityState::Requested
        } else {
            CommunityState::NotRequested
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunityState {
    NotRequested,
    Requested,
    Approved,
}

/// Append-only audit record attached to an insight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: i64,
    pub insight_id: i64,
    pub level: LogLevel,
    pub message: String,
    pub step_name: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

/// Which external repository tickets and PRs are opened against.
/// Immutable within a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub id: i64,
    pub owner: String,
    pub repo: String,
    pub base_branch: String,
    pub auto_create_tickets: bool,
    pub auto_create_prs: bool,
    pub require_approval: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl RepoConfig {
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Gate a score against the configured minimum. `None` means the source has
/// not reported a score yet, so the item stays PENDING.
pub fn status_for_score(score: Option<i64>, min_score: i64) -> FeedbackStatus {
    match score {
        Some(s) if s >= min_score => FeedbackStatus::Ready,
        _ => FeedbackStatus::Pending,
    }
}

/// Resolve the status to persist on re-ingest. Statuses at or past READY
/// are preserved so an upsert can never regress an item's lifecycle.
pub fn resolve_ingest_status(
    existing: Option<FeedbackStatus>,
    candidate: FeedbackStatus,
) -> FeedbackStatus {
    match existing {
        Some(
            s @ (FeedbackStatus::Ready
            | FeedbackStatus::Processing
            | FeedbackStatus::Processed
            | FeedbackStatus::Skipped),
        ) => s,
        _ => candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_status_roundtrip() {
        for s in &[
            "pending",
            "ready",
            "processing",
            "processed",
            "failed",
            "skipped",
        ] {
            let parsed: FeedbackStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<FeedbackStatus>().is_err());
    }

    #[test]
    fn test_insight_status_roundtrip() {
        for s in &[
            "pending",
            "analyzing",
            "ready",
            "approved",
            "in_progress",
            "completed",
            "closed",
        ] {
            let parsed: InsightStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("invalid".parse::<InsightStatus>().is_err());
    }

    #[test]
    fn test_priority_roundtrip() {
        for s in &["critical", "high", "medium", "low"] {
            let parsed: Priority = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(FeedbackStatus::Processed.is_terminal());
        assert!(FeedbackStatus::Failed.is_terminal());
        assert!(FeedbackStatus::Skipped.is_terminal());
        assert!(!FeedbackStatus::Pending.is_terminal());
        assert!(!FeedbackStatus::Ready.is_terminal());
        assert!(!FeedbackStatus::Processing.is_terminal());
    }

    #[test]
    fn test_serde_produces_snake_case_strings() {
        assert_eq!(
            serde_json::to_string(&FeedbackStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(
            serde_json::to_string(&InsightStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&Priority::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(
            serde_json::from_str::<InsightStatus>("\"analyzing\"").unwrap(),
            InsightStatus::Analyzing
        );
    }

    #[test]
    fn test_status_for_score_gating() {
        assert_eq!(status_for_score(Some(5), 2), FeedbackStatus::Ready);
        assert_eq!(status_for_score(Some(2), 2), FeedbackStatus::Ready);
        assert_eq!(status_for_score(Some(1), 2), FeedbackStatus::Pending);
        assert_eq!(status_for_score(None, 2), FeedbackStatus::Pending);
    }

    #[test]
    fn test_resolve_ingest_status_never_downgrades() {
        // A re-ingest with a low fresh score must not pull READY back.
        assert_eq!(
            resolve_ingest_status(Some(FeedbackStatus::Ready), FeedbackStatus::Pending),
            FeedbackStatus::Ready
        );
        assert_eq!(
            resolve_ingest_status(Some(FeedbackStatus::Processed), FeedbackStatus::Ready),
            FeedbackStatus::Processed
        );
        assert_eq!(
            resolve_ingest_status(Some(FeedbackStatus::Processing), FeedbackStatus::Pending),
            FeedbackStatus::Processing
        );
        // PENDING and FAILED recompute from the fresh score.
        assert_eq!(
            resolve_ingest_status(Some(FeedbackStatus::Pending), FeedbackStatus::Ready),
            FeedbackStatus::Ready
        );
        assert_eq!(
            resolve_ingest_status(Some(FeedbackStatus::Failed), FeedbackStatus::Ready),
            FeedbackStatus::Ready
        );
        assert_eq!(
            resolve_ingest_status(None, FeedbackStatus::Pending),
            FeedbackStatus::Pending
        );
    }

    #[test]
    fn test_ticket_validation() {
        let mut ticket = TicketSpec {
            title: "Fix upload failures".into(),
            problem_statement: "Uploads fail for files over 10 MB".into(),
            steps_to_reproduce: vec![],
            expected_behavior: "Upload succeeds".into(),
            actual_behavior: None,
            suspected_root_cause: None,
            suggested_fix_steps: vec![],
            acceptance_criteria: vec!["Uploads up to 100 MB succeed".into()],
            labels: vec!["bug".into()],
            priority: Priority::High,
            evidence: vec![],
        };
        assert!(ticket.validate().is_ok());

        ticket.title = "   ".into();
        assert!(ticket.validate().is_err());

        ticket.title = "Fix upload failures".into();
        ticket.acceptance_criteria.clear();
        assert!(ticket.validate().is_err());
    }

    #[test]
    fn test_community_state_progression() {
        let mut insight = sample_insight();
        assert_eq!(insight.community_state(), CommunityState::NotRequested);
        insight.community_requested = true;
        assert_eq!(insight.community_state(), CommunityState::Requested);
        insight.community_approved = true;
        assert_eq!(insight.community_state(), CommunityState::Approved);
    }

    fn sample_insight() -> Insight {
        Insight {
            id: 1,
            theme: "File Upload Issues".into(),
            description: "Users report problems uploading files.".into(),
            entry_count: 1,
            status: InsightStatus::Pending,
            priority: None,
            summary: None,
            ticket: None,
            patch_plan: None,
            ticket_number: None,
            ticket_url: None,
            pr_number: None,
            pr_url: None,
            community_requested: false,
            community_reply_id: None,
            community_reply_score: 0,
            community_approved: false,
            community_approved_at: None,
            pr_merged: false,
            approved_at: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }
}
