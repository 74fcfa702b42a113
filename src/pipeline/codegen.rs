//! Code generator.
//!
//! Turns a ticket plus patch plan into a mapping of file path → full new
//! file content, using the ordered reasoner chain as a tiered fallback:
//! primary provider, secondary provider, then the deterministic patcher,
//! which always produces output. When the patch plan names no target
//! files, candidates are inferred from the repository tree with keyword
//! heuristics derived from the ticket title.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::AppConfig;
use crate::models::{PatchPlan, TicketSpec};
use crate::reasoning::Reasoner;

const MAX_TARGETS: usize = 5;
const SCAN_DEPTH: usize = 6;
const SCAN_CAP: usize = 2000;
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", "dist", "vendor"];

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedChanges {
    /// File path → complete replacement content.
    pub files: BTreeMap<String, String>,
    /// Which tier produced the mapping.
    pub tier: String,
}

/// Rough intent classes the target heuristics key on.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TicketKind {
    Visual,
    Upload,
    Auth,
    Other,
}

fn classify_ticket(ticket: &TicketSpec) -> TicketKind {
    let text = ticket.title.to_lowercase();
    if ["dark", "theme", "mode", "style", "design", "ui"]
        .iter()
        .any(|k| text.contains(k))
    {
        TicketKind::Visual
    } else if ["upload", "file", "import", "attachment"]
        .iter()
        .any(|k| text.contains(k))
    {
        TicketKind::Upload
    } else if ["login", "auth", "password", "sign in"]
        .iter()
        .any(|k| text.contains(k))
    {
        TicketKind::Auth
    } else {
        TicketKind::Other
    }
}

/// Convert a title to a path-safe slug, limited to `max_len` bytes on a
/// character boundary.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() <= max_len {
        return slug;
    }
    let mut end = max_len;
    while end > 0 && !slug.is_char_boundary(end) {
        end -= 1;
    }
    slug[..end].trim_end_matches('-').to_string()
}

/// Read a file's content capped at `max_bytes`, truncating on a character
/// boundary. Missing or unreadable files come back as `None` — the caller
/// synthesizes those from scratch rather than erroring.
pub fn read_bounded(path: &Path, max_bytes: usize) -> Option<String> {
    let raw = std::fs::read(path).ok()?;
    let text = String::from_utf8_lossy(&raw).into_owned();
    if text.len() <= max_bytes {
        return Some(text);
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    Some(text[..end].to_string())
}

pub struct CodeGenerator {
    config: Arc<AppConfig>,
    reasoners: Vec<Arc<dyn Reasoner>>,
}

impl CodeGenerator {
    pub fn new(config: Arc<AppConfig>, reasoners: Vec<Arc<dyn Reasoner>>) -> Self {
        Self { config, reasoners }
    }

    /// Produce the file mapping for a ticket. `checkout` is the local
    /// repository copy when the clone succeeded; without it, targets fall
    /// back to synthesized paths and every file is created from scratch.
    pub async fn generate(
        &self,
        ticket: &TicketSpec,
        patch_plan: &PatchPlan,
        checkout: Option<&Path>,
    ) -> Result<GeneratedChanges> {
        let targets = if patch_plan.files_impacted.is_empty() {
            self.infer_targets(ticket, checkout)
        } else {
            patch_plan.files_impacted.clone()
        };
        debug!(?targets, "code generation targets");

        let mut last_err: Option<anyhow::Error> = None;
        for reasoner in &self.reasoners {
            match self.attempt_tier(reasoner.as_ref(), ticket, &targets, checkout).await {
                Ok(files) if !files.is_empty() => {
                    return Ok(GeneratedChanges {
                        files,
                        tier: reasoner.name().to_string(),
                    });
                }
                Ok(_) => {
                    warn!(tier = reasoner.name(), "tier produced no files");
                    last_err = Some(anyhow::anyhow!("tier produced no files"));
                }
                Err(e) => {
                    warn!(tier = reasoner.name(), error = %e, "tier failed");
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no code generation tiers configured")))
    }

    async fn attempt_tier(
        &self,
        reasoner: &dyn Reasoner,
        ticket: &TicketSpec,
        targets: &[String],
        checkout: Option<&Path>,
    ) -> Result<BTreeMap<String, String>, crate::errors::ReasoningError> {
        let mut files = BTreeMap::new();
        for target in targets {
            let current = checkout
                .and_then(|root| read_bounded(&root.join(target), self.config.max_file_bytes))
                .unwrap_or_default();
            let content = reasoner.generate_file_fix(target, &current, ticket).await?;
            files.insert(target.clone(), content);
        }
        Ok(files)
    }

    /// Candidate files for a ticket with no explicit targets. Scans the
    /// checkout for filenames matching the ticket's intent; with no
    /// checkout (or no matches) it falls back to paths that are validly
    /// creatable under the repository root, so the deterministic tier
    /// always has something to emit.
    fn infer_targets(&self, ticket: &TicketSpec, checkout: Option<&Path>) -> Vec<String> {
        let kind = classify_ticket(ticket);

        if let Some(root) = checkout {
            let matched = scan_for_targets(root, kind);
            if !matched.is_empty() {
                return matched;
            }
        }

        match kind {
            TicketKind::Visual => vec![
                "static/theme.css".to_string(),
                "static/theme-toggle.js".to_string(),
                "index.html".to_string(),
            ],
            TicketKind::Upload | TicketKind::Auth | TicketKind::Other => {
                vec![format!(
                    "docs/proposed_changes/{}.md",
                    slugify(&ticket.title, 40)
                )]
            }
        }
    }
}

fn file_matches(kind: TicketKind, name: &str) -> bool {
    let lower = name.to_lowercase();
    let ext = lower.rsplit('.').next().unwrap_or("");
    match kind {
        TicketKind::Visual => {
            matches!(ext, "css" | "scss" | "html" | "htm")
                || lower.starts_with("index.")
                || lower.starts_with("main.")
                || lower.starts_with("app.")
        }
        TicketKind::Upload => {
            ["upload", "file", "import", "form", "server"]
                .iter()
                .any(|k| lower.contains(k))
        }
        TicketKind::Auth => {
            ["auth", "login", "session", "password"]
                .iter()
                .any(|k| lower.contains(k))
        }
        TicketKind::Other => lower.starts_with("main.") || lower.starts_with("app."),
    }
}

fn scan_for_targets(root: &Path, kind: TicketKind) -> Vec<String> {
    let mut matched = Vec::new();
    let walker = WalkDir::new(root)
        .max_depth(SCAN_DEPTH)
        .into_iter()
        .filter_entry(|e| {
            e.file_name()
                .to_str()
                .map(|n| !SKIP_DIRS.contains(&n))
                .unwrap_or(true)
        });

    for entry in walker.take(SCAN_CAP) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if file_matches(kind, name) {
            if let Ok(rel) = entry.path().strip_prefix(root) {
                matched.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        if matched.len() >= MAX_TARGETS {
            break;
        }
    }
    matched.sort();
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use crate::reasoning::DeterministicReasoner;

    fn ticket(title: &str) -> TicketSpec {
        TicketSpec {
            title: title.to_string(),
            problem_statement: "p".to_string(),
            steps_to_reproduce: vec![],
            expected_behavior: "e".to_string(),
            actual_behavior: None,
            suspected_root_cause: None,
            suggested_fix_steps: vec![],
            acceptance_criteria: vec!["done".to_string()],
            labels: vec![],
            priority: Priority::Medium,
            evidence: vec![],
        }
    }

    fn plan(files: &[&str]) -> PatchPlan {
        PatchPlan {
            summary: "s".to_string(),
            files_impacted: files.iter().map(|f| f.to_string()).collect(),
            change_outline: "o".to_string(),
            risk_level: "low".to_string(),
            test_plan: "t".to_string(),
        }
    }

    fn generator() -> CodeGenerator {
        CodeGenerator::new(
            Arc::new(AppConfig::default()),
            vec![Arc::new(DeterministicReasoner::new())],
        )
    }

    #[tokio::test]
    async fn test_fallback_chain_always_yields_files() {
        // Zero target files, no checkout: the deterministic tier must
        // still produce a non-empty, plausible mapping.
        let changes = generator()
            .generate(&ticket("Implement: Dark Mode Requests"), &plan(&[]), None)
            .await
            .unwrap();
        assert!(!changes.files.is_empty());
        assert_eq!(changes.tier, "deterministic");
        assert!(changes.files.contains_key("static/theme.css"));
        for content in changes.files.values() {
            assert!(!content.is_empty());
        }
    }

    #[tokio::test]
    async fn test_non_visual_ticket_without_checkout_gets_note_file() {
        let changes = generator()
            .generate(&ticket("Fix: API rate limiting"), &plan(&[]), None)
            .await
            .unwrap();
        assert_eq!(changes.files.len(), 1);
        let path = changes.files.keys().next().unwrap();
        assert!(path.starts_with("docs/proposed_changes/"));
        assert!(path.ends_with(".md"));
    }

    #[tokio::test]
    async fn test_explicit_plan_targets_are_respected() {
        let changes = generator()
            .generate(
                &ticket("Fix: upload failures"),
                &plan(&["server/upload.py", "web/form.js"]),
                None,
            )
            .await
            .unwrap();
        assert_eq!(changes.files.len(), 2);
        assert!(changes.files.contains_key("server/upload.py"));
        assert!(changes.files.contains_key("web/form.js"));
    }

    #[tokio::test]
    async fn test_visual_ticket_infers_targets_from_checkout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("static")).unwrap();
        std::fs::write(dir.path().join("static/app.css"), "body {}").unwrap();
        std::fs::write(dir.path().join("index.html"), "<html><body></body></html>").unwrap();
        std::fs::write(dir.path().join("README.md"), "readme").unwrap();

        let changes = generator()
            .generate(
                &ticket("Implement: Dark Mode Requests"),
                &plan(&[]),
                Some(dir.path()),
            )
            .await
            .unwrap();
        assert!(changes.files.contains_key("static/app.css"));
        assert!(changes.files.contains_key("index.html"));
        assert!(!changes.files.contains_key("README.md"));
        // Existing content is preserved and extended.
        assert!(changes.files["static/app.css"].starts_with("body {}"));
    }

    #[tokio::test]
    async fn test_missing_target_file_is_synthesized() {
        let dir = tempfile::tempdir().unwrap();
        let changes = generator()
            .generate(
                &ticket("Fix: uploads"),
                &plan(&["does/not/exist.py"]),
                Some(dir.path()),
            )
            .await
            .unwrap();
        assert!(!changes.files["does/not/exist.py"].is_empty());
    }

    #[test]
    fn test_read_bounded_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, "a".repeat(100)).unwrap();
        let content = read_bounded(&path, 10).unwrap();
        assert_eq!(content.len(), 10);
        assert!(read_bounded(&dir.path().join("missing"), 10).is_none());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Fix: Dark Mode!", 40), "fix-dark-mode");
        assert_eq!(slugify("  weird   spacing  ", 40), "weird-spacing");
        assert_eq!(slugify("abcdef", 4), "abcd");
    }

    #[test]
    fn test_scan_skips_vendored_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg.css"), "x").unwrap();
        std::fs::write(dir.path().join("site.css"), "x").unwrap();
        let matched = scan_for_targets(dir.path(), TicketKind::Visual);
        assert_eq!(matched, vec!["site.css".to_string()]);
    }
}
