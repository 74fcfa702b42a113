use std::path::PathBuf;

use anyhow::{Context, Result};

/// Runtime configuration for the pipeline.
///
/// Built once in `main` (from the environment) or directly in tests, then
/// passed into each component at construction. Components never read the
/// environment themselves, so tests can inject deterministic settings and
/// fallback providers.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Engagement score an item needs before it is gated READY.
    pub min_score: i64,
    /// Minimum seconds between score checks for the same item.
    pub score_refresh_interval_secs: i64,
    /// Use fixture/stub capability providers instead of live services.
    pub demo_mode: bool,
    /// Write plan-of-attack markdown artifacts.
    pub enable_plan_artifacts: bool,
    /// Allow the PR step to push generated code (tickets are always allowed).
    pub enable_pr_automation: bool,
    /// Local directory for plan artifacts.
    pub plan_dir: PathBuf,
    /// Repo-relative path template for committed plans.
    /// Supports `{external_id}`, `{issue_number}`, `{owner}`, `{repo}`.
    pub plan_repo_path_template: String,
    /// Hard cap on a repository clone before falling back to the
    /// deterministic code-generation tier.
    pub clone_timeout_secs: u64,
    /// Largest file content sent to a reasoning provider, in bytes.
    pub max_file_bytes: usize,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub github_token: Option<String>,
    /// OAuth token for posting replies; reads work without it.
    pub reddit_token: Option<String>,
    pub user_agent: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            min_score: 2,
            score_refresh_interval_secs: 600,
            demo_mode: false,
            enable_plan_artifacts: true,
            enable_pr_automation: false,
            plan_dir: PathBuf::from("artifacts/plans"),
            plan_repo_path_template: "docs/plans/{external_id}.md".to_string(),
            clone_timeout_secs: 60,
            max_file_bytes: 48 * 1024,
            gemini_api_key: None,
            openai_api_key: None,
            github_token: None,
            reddit_token: None,
            user_agent: "threadsmith/0.1".to_string(),
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_score: env_i64("MIN_SCORE", defaults.min_score),
            score_refresh_interval_secs: env_i64(
                "SCORE_REFRESH_SECONDS",
                defaults.score_refresh_interval_secs,
            ),
            demo_mode: env_bool("DEMO_MODE", false),
            enable_plan_artifacts: env_bool("ENABLE_PLAN_ARTIFACTS", true),
            enable_pr_automation: env_bool("ENABLE_PR_AUTOMATION", false),
            plan_dir: std::env::var("PLAN_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.plan_dir),
            plan_repo_path_template: std::env::var("PLAN_REPO_PATH_TEMPLATE")
                .unwrap_or(defaults.plan_repo_path_template),
            clone_timeout_secs: env_i64("CLONE_TIMEOUT_SECONDS", 60) as u64,
            max_file_bytes: env_i64("MAX_FILE_BYTES", 48 * 1024) as usize,
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok().filter(|v| !v.is_empty()),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok().filter(|v| !v.is_empty()),
            github_token: std::env::var("GITHUB_TOKEN").ok().filter(|v| !v.is_empty()),
            reddit_token: std::env::var("REDDIT_TOKEN").ok().filter(|v| !v.is_empty()),
            user_agent: defaults.user_agent,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.plan_dir).context("Failed to create plan directory")?;
        Ok(())
    }

    /// Expand the plan path template for one feedback item. Unknown
    /// placeholders are left alone rather than erroring.
    pub fn plan_repo_path(
        &self,
        external_id: &str,
        issue_number: Option<i64>,
        owner: &str,
        repo: &str,
    ) -> String {
        self.plan_repo_path_template
            .replace("{external_id}", external_id)
            .replace(
                "{issue_number}",
                &issue_number.map(|n| n.to_string()).unwrap_or_default(),
            )
            .replace("{owner}", owner)
            .replace("{repo}", repo)
    }
}
