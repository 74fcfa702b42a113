//! Reasoning capability.
//!
//! Three providers implement the same trait and are tried in an explicit
//! ordered-attempt loop (primary → secondary → deterministic): `gemini`,
//! `openai`, and `fallback`. Prompt construction and response parsing are
//! shared here so the providers differ only in transport.

pub mod fallback;
pub mod gemini;
pub mod openai;

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::ReasoningError;
use crate::models::{
    EvidenceLink, FeedbackItem, Insight, InsightSummary, PatchPlan, Priority, TicketSpec,
};

pub use fallback::DeterministicReasoner;
pub use gemini::GeminiReasoner;
pub use openai::OpenAiReasoner;

#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Short provider name recorded in execution logs.
    fn name(&self) -> &'static str;

    async fn synthesize_summary(
        &self,
        insight: &Insight,
        members: &[FeedbackItem],
    ) -> Result<InsightSummary, ReasoningError>;

    async fn synthesize_ticket(
        &self,
        insight: &Insight,
        summary: &InsightSummary,
        members: &[FeedbackItem],
    ) -> Result<TicketSpec, ReasoningError>;

    async fn synthesize_patch_plan(
        &self,
        ticket: &TicketSpec,
    ) -> Result<PatchPlan, ReasoningError>;

    /// Produce a complete replacement for one file. `current` is empty when
    /// the target does not exist yet.
    async fn generate_file_fix(
        &self,
        path: &str,
        current: &str,
        ticket: &TicketSpec,
    ) -> Result<String, ReasoningError>;
}

// ── Prompt construction ───────────────────────────────────────────────

/// Quote the first member items for provider context.
pub(crate) fn build_context(members: &[FeedbackItem], include_metadata: bool) -> String {
    let mut parts = Vec::new();
    for (i, item) in members.iter().take(10).enumerate() {
        let mut text = item.title.clone().unwrap_or_default();
        if !item.body.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&item.body);
        }
        let mut part = format!("[Entry {}]\n{}", i + 1, text);
        if include_metadata {
            part.push_str(&format!(
                "\nScore: {} | Forum: {}\nLink: {}",
                item.score.unwrap_or(0),
                item.forum,
                item.permalink
            ));
        }
        parts.push(part);
    }
    parts.join("\n\n")
}

pub(crate) fn summary_prompt(insight: &Insight, members: &[FeedbackItem]) -> String {
    format!(
        "You are analyzing user feedback to create a structured summary.\n\n\
         **Theme:** {}\n**Description:** {}\n**Number of Entries:** {}\n\n\
         **Sample Feedback:**\n{}\n\n\
         Respond in JSON format matching this schema:\n\
         {{\"theme\": \"string\", \"severity\": \"critical|high|medium|low\", \
         \"confidence\": 0.0, \"user_impact\": \"string\", \"evidence_count\": 0}}",
        insight.theme,
        insight.description,
        insight.entry_count,
        build_context(members, false)
    )
}

pub(crate) fn ticket_prompt(summary: &InsightSummary, members: &[FeedbackItem]) -> String {
    format!(
        "You are a senior engineer converting user feedback into a structured issue.\n\n\
         **Theme:** {}\n**Priority:** {}\n**User Impact:** {}\n\n\
         **User Feedback:**\n{}\n\n\
         Respond in JSON format:\n\
         {{\"title\": \"string\", \"problem_statement\": \"string\", \
         \"steps_to_reproduce\": [\"step\"], \"expected_behavior\": \"string\", \
         \"actual_behavior\": \"string or null\", \"suspected_root_cause\": \"string or null\", \
         \"suggested_fix_steps\": [\"step\"], \"acceptance_criteria\": [\"criterion\"], \
         \"labels\": [\"label\"], \"priority\": \"critical|high|medium|low\"}}",
        summary.theme,
        summary.severity.as_str(),
        summary.user_impact,
        build_context(members, true)
    )
}

pub(crate) fn patch_plan_prompt(ticket: &TicketSpec) -> String {
    let criteria = ticket
        .acceptance_criteria
        .iter()
        .map(|c| format!("- {}", c))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are a senior engineer planning code changes for an issue.\n\n\
         **Title:** {}\n**Problem:** {}\n**Expected Behavior:** {}\n\
         **Acceptance Criteria:**\n{}\n\n\
         Respond in JSON format:\n\
         {{\"summary\": \"string\", \"files_impacted\": [\"path\"], \
         \"change_outline\": \"string\", \"risk_level\": \"low|medium|high\", \
         \"test_plan\": \"string\"}}",
        ticket.title, ticket.problem_statement, ticket.expected_behavior, criteria
    )
}

pub(crate) fn file_fix_prompt(path: &str, current: &str, ticket: &TicketSpec) -> String {
    let current_section = if current.is_empty() {
        "The file does not exist yet; create it from scratch.".to_string()
    } else {
        format!("Current content:\n```\n{}\n```", current)
    };
    format!(
        "You are implementing this issue:\n\
         **Title:** {}\n**Problem:** {}\n**Outline:** {}\n\n\
         Rewrite the file `{}` to address the issue.\n{}\n\n\
         Respond with the complete new file content only, no fences, no commentary.",
        ticket.title,
        ticket.problem_statement,
        ticket.expected_behavior,
        path,
        current_section
    )
}

// ── Response parsing ──────────────────────────────────────────────────

/// Drop a surrounding markdown fence (with optional language tag) that a
/// model emitted despite being told not to.
pub(crate) fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    let rest = rest.trim_end().strip_suffix("```").unwrap_or(rest);
    rest.trim().to_string()
}

/// Providers wrap JSON in prose or markdown fences often enough that we
/// extract the outermost object before parsing.
pub(crate) fn extract_json(raw: &str) -> &str {
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if end > start => &raw[start..=end],
        _ => raw,
    }
}

fn parse_priority(raw: &str) -> Priority {
    raw.parse().unwrap_or(Priority::Medium)
}

#[derive(Deserialize)]
struct SummaryWire {
    theme: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    user_impact: String,
    #[serde(default)]
    evidence_count: i64,
}

pub(crate) fn parse_summary(
    raw: &str,
    insight: &Insight,
) -> Result<InsightSummary, ReasoningError> {
    let wire: SummaryWire = serde_json::from_str(extract_json(raw))
        .map_err(|e| ReasoningError::Parse(e.to_string()))?;
    Ok(InsightSummary {
        theme: wire.theme,
        severity: parse_priority(&wire.severity),
        confidence: wire.confidence.clamp(0.0, 1.0),
        user_impact: wire.user_impact,
        evidence_count: if wire.evidence_count > 0 {
            wire.evidence_count
        } else {
            insight.entry_count
        },
    })
}

#[derive(Deserialize)]
struct TicketWire {
    title: String,
    problem_statement: String,
    #[serde(default)]
    steps_to_reproduce: Vec<String>,
    #[serde(default)]
    expected_behavior: String,
    #[serde(default)]
    actual_behavior: Option<String>,
    #[serde(default)]
    suspected_root_cause: Option<String>,
    #[serde(default)]
    suggested_fix_steps: Vec<String>,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    priority: String,
}

pub(crate) fn parse_ticket(
    raw: &str,
    members: &[FeedbackItem],
) -> Result<TicketSpec, ReasoningError> {
    let wire: TicketWire = serde_json::from_str(extract_json(raw))
        .map_err(|e| ReasoningError::Parse(e.to_string()))?;
    let mut ticket = TicketSpec {
        title: wire.title,
        problem_statement: wire.problem_statement,
        steps_to_reproduce: wire.steps_to_reproduce,
        expected_behavior: wire.expected_behavior,
        actual_behavior: wire.actual_behavior,
        suspected_root_cause: wire.suspected_root_cause,
        suggested_fix_steps: wire.suggested_fix_steps,
        acceptance_criteria: wire.acceptance_criteria,
        labels: wire.labels,
        priority: parse_priority(&wire.priority),
        evidence: Vec::new(),
    };
    if ticket.acceptance_criteria.is_empty() {
        ticket
            .acceptance_criteria
            .push("Issue is resolved".to_string());
    }
    ticket.evidence = evidence_from_members(members);
    ticket
        .validate()
        .map_err(ReasoningError::Parse)?;
    Ok(ticket)
}

pub(crate) fn parse_patch_plan(raw: &str) -> Result<PatchPlan, ReasoningError> {
    serde_json::from_str(extract_json(raw)).map_err(|e| ReasoningError::Parse(e.to_string()))
}

/// Every member item contributes a quoted excerpt and its source link.
pub(crate) fn evidence_from_members(members: &[FeedbackItem]) -> Vec<EvidenceLink> {
    members
        .iter()
        .map(|m| {
            let text = m.title.clone().unwrap_or_else(|| m.body.clone());
            let excerpt: String = text.chars().take(200).collect();
            EvidenceLink {
                external_id: m.external_id.clone(),
                permalink: m.permalink.clone(),
                excerpt,
            }
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```css\nbody {}\n```"), "body {}");
        assert_eq!(strip_code_fences("```\nplain\n```"), "plain");
        assert_eq!(strip_code_fences("body {}"), "body {}");
    }

    #[test]
    fn test_extract_json_strips_markdown_fences() {
        let raw = "Here's the result:\n```json\n{\"theme\": \"x\"}\n```\ntrailing";
        assert_eq!(extract_json(raw), "{\"theme\": \"x\"}");
    }

    #[test]
    fn test_extract_json_passes_through_plain_object() {
        assert_eq!(extract_json("{\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_summary_defaults_evidence_count() {
        let insight = insight("File Upload Issues", 4);
        let summary = parse_summary(
            r#"{"theme": "Uploads", "severity": "high", "confidence": 0.9, "user_impact": "blocked"}"#,
            &insight,
        )
        .unwrap();
        assert_eq!(summary.evidence_count, 4);
        assert_eq!(summary.severity, Priority::High);
    }

    #[test]
    fn test_parse_summary_unknown_severity_maps_to_medium() {
        let insight = insight("x", 1);
        let summary = parse_summary(
            r#"{"theme": "x", "severity": "urgent", "user_impact": "y"}"#,
            &insight,
        )
        .unwrap();
        assert_eq!(summary.severity, Priority::Medium);
    }

    #[test]
    fn test_parse_ticket_attaches_evidence_for_every_member() {
        let members = vec![
            member("t3_a", Some("Uploads broken"), "it fails"),
            member("t1_b", None, "same problem here"),
        ];
        let ticket = parse_ticket(
            r#"{"title": "Fix uploads", "problem_statement": "uploads fail",
                "expected_behavior": "uploads work",
                "acceptance_criteria": ["works"], "labels": ["bug"], "priority": "high"}"#,
            &members,
        )
        .unwrap();
        assert_eq!(ticket.evidence.len(), 2);
        assert_eq!(ticket.evidence[0].external_id, "t3_a");
        assert_eq!(ticket.evidence[1].excerpt, "same problem here");
    }

    #[test]
    fn test_parse_ticket_supplies_default_criterion() {
        let ticket = parse_ticket(
            r#"{"title": "Fix it", "problem_statement": "broken", "expected_behavior": "works"}"#,
            &[],
        )
        .unwrap();
        assert_eq!(ticket.acceptance_criteria, vec!["Issue is resolved"]);
    }

    #[test]
    fn test_parse_ticket_rejects_empty_title() {
        let result = parse_ticket(
            r#"{"title": "  ", "problem_statement": "broken", "expected_behavior": "works"}"#,
            &[],
        );
        assert!(matches!(result, Err(ReasoningError::Parse(_))));
    }

    #[test]
    fn test_evidence_excerpt_is_bounded() {
        let long_body = "x".repeat(500);
        let members = vec![member("t3_a", None, &long_body)];
        let evidence = evidence_from_members(&members);
        assert_eq!(evidence[0].excerpt.chars().count(), 200);
    }

    #[test]
    fn test_build_context_caps_entries() {
        let members: Vec<_> = (0..15)
            .map(|i| member(&format!("t1_{}", i), None, "body"))
            .collect();
        let context = build_context(&members, false);
        assert!(context.contains("[Entry 10]"));
        assert!(!context.contains("[Entry 11]"));
    }

    #[test]
    fn test_file_fix_prompt_handles_missing_file() {
        let members = vec![member("t3_a", None, "b")];
        let ticket = parse_ticket(
            r#"{"title": "Fix", "problem_statement": "p", "expected_behavior": "e"}"#,
            &members,
        )
        .unwrap();
        let prompt = file_fix_prompt("static/app.css", "", &ticket);
        assert!(prompt.contains("does not exist yet"));
        let prompt = file_fix_prompt("static/app.css", "body {}", &ticket);
        assert!(prompt.contains("body {}"));
    }
}
