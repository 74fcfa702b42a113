//! In-memory source-control stub for demo mode and tests.
//!
//! Records every publish action so tests can assert on branch/ticket/PR
//! state and on how many times a merge actually fired.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::VcsError;
use crate::models::RepoConfig;

use super::{CreatedPr, CreatedTicket, PrPayload, SourceControl, TicketPayload};

#[derive(Default)]
struct StubState {
    branches: Vec<String>,
    files: HashMap<(String, String), String>,
    tickets: Vec<TicketPayload>,
    prs: Vec<(PrPayload, i64)>,
    merges: Vec<i64>,
    next_ticket: i64,
    next_pr: i64,
}

pub struct StubVcs {
    state: Mutex<StubState>,
}

impl StubVcs {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState {
                next_ticket: 1,
                next_pr: 1,
                ..StubState::default()
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StubState>, VcsError> {
        self.state
            .lock()
            .map_err(|_| VcsError::Api("stub state poisoned".into()))
    }

    pub fn merge_count(&self) -> usize {
        self.state.lock().map(|s| s.merges.len()).unwrap_or(0)
    }

    pub fn ticket_count(&self) -> usize {
        self.state.lock().map(|s| s.tickets.len()).unwrap_or(0)
    }

    pub fn branch_count(&self) -> usize {
        self.state.lock().map(|s| s.branches.len()).unwrap_or(0)
    }

    pub fn file_content(&self, branch: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.files.get(&(branch.to_string(), path.to_string())).cloned())
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().map(|s| s.files.len()).unwrap_or(0)
    }
}

impl Default for StubVcs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceControl for StubVcs {
    async fn create_branch(&self, _repo: &RepoConfig, branch: &str) -> Result<(), VcsError> {
        let mut state = self.lock()?;
        if state.branches.iter().any(|b| b == branch) {
            return Err(VcsError::BranchExists {
                branch: branch.to_string(),
            });
        }
        state.branches.push(branch.to_string());
        Ok(())
    }

    async fn clone_repo(
        &self,
        _repo: &RepoConfig,
        dest: &Path,
        _timeout: Duration,
    ) -> Result<PathBuf, VcsError> {
        std::fs::create_dir_all(dest).map_err(|e| VcsError::Api(e.to_string()))?;
        Ok(dest.to_path_buf())
    }

    async fn upsert_file(
        &self,
        _repo: &RepoConfig,
        branch: &str,
        path: &str,
        content: &str,
        _message: &str,
    ) -> Result<String, VcsError> {
        let mut state = self.lock()?;
        state
            .files
            .insert((branch.to_string(), path.to_string()), content.to_string());
        Ok(format!("sha-{}-{}", branch, path))
    }

    async fn open_ticket(
        &self,
        repo: &RepoConfig,
        payload: &TicketPayload,
    ) -> Result<CreatedTicket, VcsError> {
        let mut state = self.lock()?;
        let number = state.next_ticket;
        state.next_ticket += 1;
        state.tickets.push(payload.clone());
        Ok(CreatedTicket {
            number,
            url: format!("https://github.local/{}/issues/{}", repo.slug(), number),
        })
    }

    async fn open_pull_request(
        &self,
        repo: &RepoConfig,
        payload: &PrPayload,
    ) -> Result<CreatedPr, VcsError> {
        let mut state = self.lock()?;
        if let Some((_, number)) = state
            .prs
            .iter()
            .find(|(p, _)| p.head_branch == payload.head_branch)
        {
            let number = *number;
            return Ok(CreatedPr {
                number,
                url: format!("https://github.local/{}/pull/{}", repo.slug(), number),
            });
        }
        let number = state.next_pr;
        state.next_pr += 1;
        state.prs.push((payload.clone(), number));
        Ok(CreatedPr {
            number,
            url: format!("https://github.local/{}/pull/{}", repo.slug(), number),
        })
    }

    async fn find_open_pull_request(
        &self,
        repo: &RepoConfig,
        head_branch: &str,
    ) -> Result<Option<CreatedPr>, VcsError> {
        let state = self.lock()?;
        Ok(state
            .prs
            .iter()
            .find(|(p, _)| p.head_branch == head_branch)
            .map(|(_, number)| CreatedPr {
                number: *number,
                url: format!("https://github.local/{}/pull/{}", repo.slug(), number),
            }))
    }

    async fn merge_pr(&self, _repo: &RepoConfig, number: i64) -> Result<(), VcsError> {
        let mut state = self.lock()?;
        state.merges.push(number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepoConfig {
        RepoConfig {
            id: 1,
            owner: "octo".into(),
            repo: "widgets".into(),
            base_branch: "main".into(),
            auto_create_tickets: true,
            auto_create_prs: false,
            require_approval: true,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_branch_is_reported() {
        let vcs = StubVcs::new();
        vcs.create_branch(&repo(), "fix/uploads").await.unwrap();
        let err = vcs.create_branch(&repo(), "fix/uploads").await.unwrap_err();
        assert!(matches!(err, VcsError::BranchExists { .. }));
    }

    #[tokio::test]
    async fn test_ticket_numbers_are_sequential() {
        let vcs = StubVcs::new();
        let payload = TicketPayload {
            title: "t".into(),
            body: "b".into(),
            labels: vec![],
        };
        let first = vcs.open_ticket(&repo(), &payload).await.unwrap();
        let second = vcs.open_ticket(&repo(), &payload).await.unwrap();
        assert_eq!(first.number, 1);
        assert_eq!(second.number, 2);
        assert!(second.url.contains("octo/widgets"));
    }

    #[tokio::test]
    async fn test_duplicate_pr_returns_existing() {
        let vcs = StubVcs::new();
        let payload = PrPayload {
            title: "t".into(),
            body: "b".into(),
            head_branch: "fix/x".into(),
            base_branch: "main".into(),
        };
        let first = vcs.open_pull_request(&repo(), &payload).await.unwrap();
        let second = vcs.open_pull_request(&repo(), &payload).await.unwrap();
        assert_eq!(first.number, second.number);
        let found = vcs
            .find_open_pull_request(&repo(), "fix/x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.number, first.number);
    }

    #[tokio::test]
    async fn test_upsert_file_is_readable_back() {
        let vcs = StubVcs::new();
        vcs.upsert_file(&repo(), "fix/x", "docs/plan.md", "# Plan", "msg")
            .await
            .unwrap();
        assert_eq!(
            vcs.file_content("fix/x", "docs/plan.md").as_deref(),
            Some("# Plan")
        );
    }
}
