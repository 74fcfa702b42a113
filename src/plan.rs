//! Plan-of-attack markdown artifacts.
//!
//! Each ticket gets a human-readable plan document: overview, evidence
//! pulled from the member feedback items, observed keyword signals, the
//! proposed fix steps, and acceptance criteria. The document is written
//! locally and committed to the PR branch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;

use crate::models::{FeedbackItem, InsightSummary, TicketSpec};

/// Most frequent words of four letters or more, ties resolved by first
/// appearance so the output is stable.
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    let word_re = Regex::new(r"\b[a-zA-Z]{4,}\b").expect("static regex");
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut first_seen: HashMap<String, usize> = HashMap::new();

    for (idx, m) in word_re.find_iter(&text.to_lowercase()).enumerate() {
        let word = m.as_str().to_string();
        *counts.entry(word.clone()).or_insert(0) += 1;
        first_seen.entry(word).or_insert(idx);
    }

    let mut words: Vec<(String, usize)> = counts.into_iter().collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then(first_seen[&a.0].cmp(&first_seen[&b.0])));
    words.into_iter().take(limit).map(|(w, _)| w).collect()
}

/// Render the plan markdown for one primary item and its sibling evidence.
pub fn build_plan(
    item: &FeedbackItem,
    ticket: &TicketSpec,
    summary: &InsightSummary,
    members: &[FeedbackItem],
) -> String {
    let keywords = extract_keywords(
        &format!(
            "{} {} {} {}",
            item.title.as_deref().unwrap_or(""),
            item.body,
            ticket.problem_statement,
            ticket.expected_behavior
        ),
        5,
    );

    let mut evidence = vec![
        format!("- Score: **{}** upvotes", item.score.unwrap_or(0)),
        format!("- Author: {}", item.author),
        format!("- Forum: {}", item.forum),
        format!("- Link: {}", item.permalink),
    ];
    for extra in members.iter().filter(|m| m.id != item.id).take(2) {
        evidence.push(format!(
            "- Related comment: [{}]({}) ({} upvotes)",
            extra.permalink,
            extra.permalink,
            extra.score.unwrap_or(0)
        ));
    }

    let fix_steps: Vec<String> = if ticket.suggested_fix_steps.is_empty() {
        ticket.acceptance_criteria.clone()
    } else {
        ticket.suggested_fix_steps.clone()
    };

    let mut lines = vec![
        format!("# Plan: {}", ticket.title),
        String::new(),
        format!(
            "_Generated for feedback item `{}` on {}_",
            item.external_id,
            Utc::now().to_rfc3339()
        ),
        String::new(),
        "## Overview".to_string(),
        format!("- **Problem**: {}", ticket.problem_statement),
        format!("- **Why it matters**: {}", summary.user_impact),
        String::new(),
        "## Evidence".to_string(),
    ];
    lines.extend(evidence);
    lines.extend([
        String::new(),
        "## Observed Signals".to_string(),
        format!(
            "- Keywords: {}",
            if keywords.is_empty() {
                "N/A".to_string()
            } else {
                keywords.join(", ")
            }
        ),
        format!(
            "- Acceptance criteria: {} items",
            ticket.acceptance_criteria.len()
        ),
        String::new(),
        "## Proposed Fix Approach".to_string(),
    ]);
    if fix_steps.is_empty() {
        lines.push("1. Analyze logs & reproduce locally.".to_string());
    } else {
        for (i, step) in fix_steps.iter().enumerate() {
            lines.push(format!("{}. {}", i + 1, step));
        }
    }
    lines.extend([
        String::new(),
        "## Acceptance Criteria".to_string(),
    ]);
    for criterion in &ticket.acceptance_criteria {
        lines.push(format!("- {}", criterion));
    }
    lines.extend([
        String::new(),
        "## Risks & Edge Cases".to_string(),
        format!(
            "- {}",
            ticket
                .suspected_root_cause
                .as_deref()
                .unwrap_or("Risk details pending.")
        ),
        String::new(),
        "## Owner Suggestions".to_string(),
        format!("- Suggested component: {}", summary.theme),
        format!("- Suggested priority: {}", ticket.priority.as_str()),
    ]);

    lines.join("\n")
}

/// Write the plan under the configured artifacts directory.
pub fn save_plan(content: &str, plan_dir: &Path, external_id: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(plan_dir).context("Failed to create plan directory")?;
    let path = plan_dir.join(format!("{}.md", external_id));
    std::fs::write(&path, content).context("Failed to write plan file")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeedbackKind, FeedbackStatus, Priority};

    fn item(external_id: &str, score: Option<i64>) -> FeedbackItem {
        FeedbackItem {
            id: 1,
            external_id: external_id.to_string(),
            kind: FeedbackKind::Post,
            title: Some("Uploads failing constantly".to_string()),
            body: "Every upload over ten megabytes fails with an error".to_string(),
            author: "user1".to_string(),
            forum: "webappfans".to_string(),
            permalink: "https://example.com/t3_abc".to_string(),
            score,
            num_comments: 2,
            status: FeedbackStatus::Ready,
            last_score_check_at: None,
            processed_at: None,
            ticket_url: None,
            pr_url: None,
            plan_path: None,
            insight_id: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            source_created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn ticket() -> TicketSpec {
        TicketSpec {
            title: "Fix large file uploads".to_string(),
            problem_statement: "Uploads over 10MB fail".to_string(),
            steps_to_reproduce: vec!["Upload a 20MB file".to_string()],
            expected_behavior: "Upload succeeds".to_string(),
            actual_behavior: Some("Server returns 500".to_string()),
            suspected_root_cause: Some("Body size cap too low".to_string()),
            suggested_fix_steps: vec![
                "Raise the body size limit".to_string(),
                "Add a regression test".to_string(),
            ],
            acceptance_criteria: vec!["Uploads up to 100MB succeed".to_string()],
            labels: vec!["bug".to_string()],
            priority: Priority::High,
            evidence: vec![],
        }
    }

    fn summary() -> InsightSummary {
        InsightSummary {
            theme: "File Upload Issues".to_string(),
            severity: Priority::High,
            confidence: 0.8,
            user_impact: "Users cannot share files".to_string(),
            evidence_count: 1,
        }
    }

    #[test]
    fn test_plan_contains_expected_sections() {
        let plan = build_plan(&item("t3_abc", Some(5)), &ticket(), &summary(), &[]);
        assert!(plan.starts_with("# Plan: Fix large file uploads"));
        for section in [
            "## Overview",
            "## Evidence",
            "## Observed Signals",
            "## Proposed Fix Approach",
            "## Acceptance Criteria",
            "## Risks & Edge Cases",
            "## Owner Suggestions",
        ] {
            assert!(plan.contains(section), "missing section {}", section);
        }
        assert!(plan.contains("t3_abc"));
        assert!(plan.contains("Score: **5** upvotes"));
        assert!(plan.contains("1. Raise the body size limit"));
        assert!(plan.contains("Suggested priority: high"));
    }

    #[test]
    fn test_plan_falls_back_to_acceptance_criteria_for_steps() {
        let mut t = ticket();
        t.suggested_fix_steps.clear();
        let plan = build_plan(&item("t3_abc", None), &t, &summary(), &[]);
        assert!(plan.contains("1. Uploads up to 100MB succeed"));
        assert!(plan.contains("Score: **0** upvotes"));
    }

    #[test]
    fn test_plan_includes_related_members() {
        let primary = item("t3_abc", Some(5));
        let mut sibling = item("t1_def", Some(3));
        sibling.id = 2;
        sibling.permalink = "https://example.com/t1_def".to_string();
        let plan = build_plan(&primary, &ticket(), &summary(), &[primary.clone(), sibling]);
        assert!(plan.contains("Related comment: [https://example.com/t1_def]"));
    }

    #[test]
    fn test_extract_keywords_orders_by_frequency() {
        let words = extract_keywords("upload upload upload error error file", 3);
        assert_eq!(words[0], "upload");
        assert_eq!(words[1], "error");
        assert_eq!(words[2], "file");
    }

    #[test]
    fn test_extract_keywords_skips_short_words() {
        let words = extract_keywords("the a an it is to of in", 5);
        assert!(words.is_empty());
    }

    #[test]
    fn test_save_plan_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_plan("# Plan", dir.path(), "t3_abc").unwrap();
        assert!(path.ends_with("t3_abc.md"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# Plan");
    }
}
