//! Typed error hierarchy for the threadsmith pipeline.
//!
//! Three capability enums cover the external boundaries:
//! - `SourceError` — feedback-source lookups (thread fetch, score poll, reply)
//! - `ReasoningError` — reasoning-provider calls
//! - `VcsError` — source-control operations
//!
//! `PipelineError` wraps the orchestration-level failures that API handlers
//! translate into structured responses.

use thiserror::Error;

/// Errors from the feedback-source capability.
///
/// `NotFound` and `RateLimited` are distinct, retryable kinds: a score poll
/// hitting either leaves the item PENDING for the next scheduled run.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("item {external_id} not found at source")]
    NotFound { external_id: String },

    #[error("rate limited by feedback source")]
    RateLimited,

    #[error("network error talking to feedback source: {0}")]
    Network(String),

    #[error("unparseable response from feedback source: {0}")]
    Parse(String),
}

impl SourceError {
    /// Transient errors are retried on the next scheduled invocation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Network(_))
    }
}

/// Errors from a reasoning provider.
///
/// `QuotaExhausted` is its own kind so the code-generation chain can react
/// to it specifically (fall to the next tier) instead of treating it as a
/// generic provider failure.
#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("provider quota exhausted")]
    QuotaExhausted,

    #[error("provider not configured")]
    Unavailable,

    #[error("provider error: {0}")]
    Provider(String),

    #[error("could not parse provider output: {0}")]
    Parse(String),
}

/// Errors from the source-control capability.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("repository {owner}/{repo} not accessible")]
    RepoInaccessible { owner: String, repo: String },

    #[error("clone of {repo} timed out after {seconds}s")]
    CloneTimeout { repo: String, seconds: u64 },

    #[error("branch {branch} already exists")]
    BranchExists { branch: String },

    #[error("source-control API error: {0}")]
    Api(String),
}

/// Orchestration-level failures surfaced to the trigger interface.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("insight {id} not found")]
    InsightNotFound { id: i64 },

    #[error("feedback item {id} not found")]
    FeedbackNotFound { id: i64 },

    #[error("no repository configured")]
    NoRepoConfig,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("reasoning error: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("source-control error: {0}")]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
