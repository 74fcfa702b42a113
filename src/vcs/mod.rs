//! Source-control capability.
//!
//! The pipeline publishes artifacts (branches, committed files, tickets,
//! pull requests, merges) through this trait. The live implementation
//! talks to GitHub's REST API; demo runs and tests use the in-memory stub.

pub mod github;
pub mod stub;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::VcsError;
use crate::models::RepoConfig;

pub use github::GitHubVcs;
pub use stub::StubVcs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketPayload {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedTicket {
    pub number: i64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrPayload {
    pub title: String,
    pub body: String,
    pub head_branch: String,
    pub base_branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedPr {
    pub number: i64,
    pub url: String,
}

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Create `branch` off the repo's base branch. An already-existing
    /// branch surfaces as `VcsError::BranchExists`, which callers treat as
    /// success (the publish operations are idempotent).
    async fn create_branch(&self, repo: &RepoConfig, branch: &str) -> Result<(), VcsError>;

    /// Shallow-clone the repository into `dest`. Must complete within
    /// `timeout`; a timeout maps to `VcsError::CloneTimeout` so the code
    /// generator can fall back to its deterministic tier.
    async fn clone_repo(
        &self,
        repo: &RepoConfig,
        dest: &Path,
        timeout: Duration,
    ) -> Result<PathBuf, VcsError>;

    /// Create or update one file on a branch. Returns the new content sha.
    async fn upsert_file(
        &self,
        repo: &RepoConfig,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<String, VcsError>;

    async fn open_ticket(
        &self,
        repo: &RepoConfig,
        payload: &TicketPayload,
    ) -> Result<CreatedTicket, VcsError>;

    async fn open_pull_request(
        &self,
        repo: &RepoConfig,
        payload: &PrPayload,
    ) -> Result<CreatedPr, VcsError>;

    /// Look up an open PR for a head branch, for duplicate-request recovery.
    async fn find_open_pull_request(
        &self,
        repo: &RepoConfig,
        head_branch: &str,
    ) -> Result<Option<CreatedPr>, VcsError>;

    async fn merge_pr(&self, repo: &RepoConfig, number: i64) -> Result<(), VcsError>;
}
