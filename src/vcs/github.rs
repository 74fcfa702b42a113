//! GitHub REST implementation of the source-control capability.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use crate::errors::VcsError;
use crate::models::RepoConfig;

use super::{CreatedPr, CreatedTicket, PrPayload, SourceControl, TicketPayload};

const API_BASE: &str = "https://api.github.com";

pub struct GitHubVcs {
    client: reqwest::Client,
    token: String,
    user_agent: String,
}

impl GitHubVcs {
    pub fn new(token: String, user_agent: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            user_agent: user_agent.to_string(),
        }
    }

    fn repo_url(&self, repo: &RepoConfig, path: &str) -> String {
        format!("{}/repos/{}/{}/{}", API_BASE, repo.owner, repo.repo, path)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", &self.user_agent)
    }

    async fn json_or_error(
        resp: reqwest::Response,
        repo: &RepoConfig,
    ) -> Result<Value, VcsError> {
        let status = resp.status().as_u16();
        match status {
            401 | 403 | 404 => Err(VcsError::RepoInaccessible {
                owner: repo.owner.clone(),
                repo: repo.repo.clone(),
            }),
            s if s >= 400 => {
                let body = resp.text().await.unwrap_or_default();
                Err(VcsError::Api(format!("status {}: {}", s, body)))
            }
            _ => resp
                .json::<Value>()
                .await
                .map_err(|e| VcsError::Api(e.to_string())),
        }
    }

    async fn branch_sha(&self, repo: &RepoConfig, branch: &str) -> Result<String, VcsError> {
        let url = self.repo_url(repo, &format!("git/refs/heads/{}", branch));
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| VcsError::Api(e.to_string()))?;
        let payload = Self::json_or_error(resp, repo).await?;
        payload
            .pointer("/object/sha")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| VcsError::Api("ref response missing sha".into()))
    }

    /// Content sha of an existing file on a branch, if any.
    async fn file_sha(
        &self,
        repo: &RepoConfig,
        branch: &str,
        path: &str,
    ) -> Result<Option<String>, VcsError> {
        let url = self.repo_url(repo, &format!("contents/{}?ref={}", path, branch));
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| VcsError::Api(e.to_string()))?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let payload = Self::json_or_error(resp, repo).await?;
        Ok(payload
            .get("sha")
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

#[async_trait]
impl SourceControl for GitHubVcs {
    async fn create_branch(&self, repo: &RepoConfig, branch: &str) -> Result<(), VcsError> {
        let base_sha = self.branch_sha(repo, &repo.base_branch).await?;
        let url = self.repo_url(repo, "git/refs");
        let resp = self
            .request(reqwest::Method::POST, &url)
            .json(&json!({
                "ref": format!("refs/heads/{}", branch),
                "sha": base_sha,
            }))
            .send()
            .await
            .map_err(|e| VcsError::Api(e.to_string()))?;

        // 422 means the ref already exists.
        if resp.status().as_u16() == 422 {
            return Err(VcsError::BranchExists {
                branch: branch.to_string(),
            });
        }
        Self::json_or_error(resp, repo).await?;
        Ok(())
    }

    async fn clone_repo(
        &self,
        repo: &RepoConfig,
        dest: &Path,
        timeout: Duration,
    ) -> Result<PathBuf, VcsError> {
        let clone_url = format!(
            "https://x-access-token:{}@github.com/{}/{}.git",
            self.token, repo.owner, repo.repo
        );
        let dest_str = dest.to_string_lossy().to_string();

        let clone = tokio::process::Command::new("git")
            .args([
                "clone",
                "--depth",
                "1",
                "--branch",
                &repo.base_branch,
                &clone_url,
                &dest_str,
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();

        let output = tokio::time::timeout(timeout, clone)
            .await
            .map_err(|_| VcsError::CloneTimeout {
                repo: repo.slug(),
                seconds: timeout.as_secs(),
            })?
            .map_err(|e| VcsError::Api(format!("failed to run git clone: {}", e)))?;

        if !output.status.success() {
            return Err(VcsError::RepoInaccessible {
                owner: repo.owner.clone(),
                repo: repo.repo.clone(),
            });
        }
        Ok(dest.to_path_buf())
    }

    async fn upsert_file(
        &self,
        repo: &RepoConfig,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<String, VcsError> {
        let existing_sha = self.file_sha(repo, branch, path).await?;
        let url = self.repo_url(repo, &format!("contents/{}", path));
        let mut body = json!({
            "message": message,
            "content": BASE64.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(sha) = existing_sha {
            body["sha"] = json!(sha);
        }
        let resp = self
            .request(reqwest::Method::PUT, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VcsError::Api(e.to_string()))?;
        let payload = Self::json_or_error(resp, repo).await?;
        payload
            .pointer("/content/sha")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| VcsError::Api("contents response missing sha".into()))
    }

    async fn open_ticket(
        &self,
        repo: &RepoConfig,
        payload: &TicketPayload,
    ) -> Result<CreatedTicket, VcsError> {
        let url = self.repo_url(repo, "issues");
        let resp = self
            .request(reqwest::Method::POST, &url)
            .json(&json!({
                "title": payload.title,
                "body": payload.body,
                "labels": payload.labels,
            }))
            .send()
            .await
            .map_err(|e| VcsError::Api(e.to_string()))?;
        let value = Self::json_or_error(resp, repo).await?;
        Ok(CreatedTicket {
            number: value.get("number").and_then(Value::as_i64).unwrap_or(0),
            url: value
                .get("html_url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn open_pull_request(
        &self,
        repo: &RepoConfig,
        payload: &PrPayload,
    ) -> Result<CreatedPr, VcsError> {
        let url = self.repo_url(repo, "pulls");
        let resp = self
            .request(reqwest::Method::POST, &url)
            .json(&json!({
                "title": payload.title,
                "body": payload.body,
                "head": payload.head_branch,
                "base": payload.base_branch,
            }))
            .send()
            .await
            .map_err(|e| VcsError::Api(e.to_string()))?;

        // 422 usually means a PR already exists for this head branch;
        // recover by looking it up instead of failing the operation.
        if resp.status().as_u16() == 422 {
            if let Some(existing) = self
                .find_open_pull_request(repo, &payload.head_branch)
                .await?
            {
                return Ok(existing);
            }
            return Err(VcsError::Api("pull request rejected (422)".into()));
        }

        let value = Self::json_or_error(resp, repo).await?;
        Ok(CreatedPr {
            number: value.get("number").and_then(Value::as_i64).unwrap_or(0),
            url: value
                .get("html_url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn find_open_pull_request(
        &self,
        repo: &RepoConfig,
        head_branch: &str,
    ) -> Result<Option<CreatedPr>, VcsError> {
        let url = self.repo_url(
            repo,
            &format!("pulls?state=open&head={}:{}", repo.owner, head_branch),
        );
        let resp = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(|e| VcsError::Api(e.to_string()))?;
        let value = Self::json_or_error(resp, repo).await?;
        let Some(first) = value.as_array().and_then(|a| a.first()) else {
            return Ok(None);
        };
        Ok(Some(CreatedPr {
            number: first.get("number").and_then(Value::as_i64).unwrap_or(0),
            url: first
                .get("html_url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }))
    }

    async fn merge_pr(&self, repo: &RepoConfig, number: i64) -> Result<(), VcsError> {
        let url = self.repo_url(repo, &format!("pulls/{}/merge", number));
        let resp = self
            .request(reqwest::Method::PUT, &url)
            .json(&json!({ "merge_method": "squash" }))
            .send()
            .await
            .map_err(|e| VcsError::Api(e.to_string()))?;
        Self::json_or_error(resp, repo).await?;
        Ok(())
    }
}
