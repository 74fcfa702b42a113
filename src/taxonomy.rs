//! Theme taxonomy for grouping feedback into insights.
//!
//! Matching is a pure function over immutable input: an ordered list of
//! (theme, keyword set) rules is scored by keyword overlap, the highest
//! overlap wins, and ties go to the rule declared first. Items matching
//! nothing fall into a catch-all theme.

/// One taxonomy rule: a human-readable theme plus the keywords that vote
/// for it.
#[derive(Debug, Clone)]
pub struct ThemeRule {
    pub theme: String,
    pub description: String,
    pub keywords: Vec<String>,
}

impl ThemeRule {
    pub fn new(theme: &str, description: &str, keywords: &[&str]) -> Self {
        Self {
            theme: theme.to_string(),
            description: description.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Result of classifying one feedback item.
#[derive(Debug, Clone, PartialEq)]
pub struct ThemeMatch {
    pub theme: String,
    pub description: String,
    /// Number of distinct keywords that matched; 0 for the catch-all.
    pub overlap: usize,
}

pub const CATCH_ALL_THEME: &str = "General Feedback";
const CATCH_ALL_DESCRIPTION: &str = "Mixed feedback without a dominant theme yet.";

#[derive(Debug, Clone)]
pub struct Taxonomy {
    rules: Vec<ThemeRule>,
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self {
            rules: vec![
                ThemeRule::new(
                    "Authentication Issues",
                    "Users report login and authentication failures.",
                    &[
                        "auth", "login", "log in", "sign in", "signin", "password", "2fa", "mfa",
                        "oauth",
                    ],
                ),
                ThemeRule::new(
                    "File Upload Issues",
                    "Users report problems uploading or importing files.",
                    &["upload", "file", "attachment", "import", "csv"],
                ),
                ThemeRule::new(
                    "Dark Mode Requests",
                    "Users request a dark mode option.",
                    &["dark mode", "dark theme", "night mode"],
                ),
                ThemeRule::new(
                    "Performance Issues",
                    "Users report slowness or performance regressions.",
                    &["slow", "lag", "performance", "timeout", "loading", "freeze"],
                ),
                ThemeRule::new(
                    "UI/UX Issues",
                    "Users report usability or interface issues.",
                    &["ui", "ux", "layout", "button", "design", "navigation"],
                ),
            ],
        }
    }
}

impl Taxonomy {
    pub fn new(rules: Vec<ThemeRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ThemeRule] {
        &self.rules
    }

    /// Assign a theme by keyword overlap. Highest distinct-keyword count
    /// wins; ties are broken by rule declaration order, which keeps the
    /// assignment deterministic across runs.
    pub fn classify(&self, title: Option<&str>, body: &str) -> ThemeMatch {
        let text = format!("{}\n{}", title.unwrap_or(""), body).to_lowercase();

        let mut best: Option<(&ThemeRule, usize)> = None;
        for rule in &self.rules {
            let overlap = rule
                .keywords
                .iter()
                .filter(|k| text.contains(k.to_lowercase().as_str()))
                .count();
            if overlap == 0 {
                continue;
            }
            match best {
                Some((_, best_overlap)) if overlap <= best_overlap => {}
                _ => best = Some((rule, overlap)),
            }
        }

        match best {
            Some((rule, overlap)) => ThemeMatch {
                theme: rule.theme.clone(),
                description: rule.description.clone(),
                overlap,
            },
            None => ThemeMatch {
                theme: CATCH_ALL_THEME.to_string(),
                description: CATCH_ALL_DESCRIPTION.to_string(),
                overlap: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_keyword_match() {
        let taxonomy = Taxonomy::default();
        let m = taxonomy.classify(Some("Can't upload my avatar"), "it just spins forever");
        assert_eq!(m.theme, "File Upload Issues");
        assert_eq!(m.overlap, 1);
    }

    #[test]
    fn test_no_match_falls_to_catch_all() {
        let taxonomy = Taxonomy::default();
        let m = taxonomy.classify(None, "I love this product, keep it up");
        assert_eq!(m.theme, CATCH_ALL_THEME);
        assert_eq!(m.overlap, 0);
    }

    #[test]
    fn test_highest_overlap_wins() {
        let taxonomy = Taxonomy::default();
        // One upload keyword vs. two performance keywords.
        let m = taxonomy.classify(
            Some("upload is slow"),
            "the loading spinner takes forever on big files",
        );
        assert_eq!(m.theme, "Performance Issues");
        assert!(m.overlap >= 2);
    }

    #[test]
    fn test_tie_breaks_to_earliest_rule() {
        let taxonomy = Taxonomy::new(vec![
            ThemeRule::new("First", "first", &["alpha"]),
            ThemeRule::new("Second", "second", &["beta"]),
        ]);
        // Both rules match exactly one keyword; declaration order decides.
        let m = taxonomy.classify(None, "alpha and beta are both here");
        assert_eq!(m.theme, "First");
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let taxonomy = Taxonomy::default();
        let m = taxonomy.classify(Some("DARK MODE please"), "");
        assert_eq!(m.theme, "Dark Mode Requests");
    }

    #[test]
    fn test_overlap_counts_distinct_keywords_once() {
        let taxonomy = Taxonomy::default();
        // "upload" appears three times, but counts as one keyword.
        let m = taxonomy.classify(None, "upload upload upload");
        assert_eq!(m.overlap, 1);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let taxonomy = Taxonomy::default();
        let first = taxonomy.classify(Some("login broken"), "password reset fails too");
        for _ in 0..10 {
            let again = taxonomy.classify(Some("login broken"), "password reset fails too");
            assert_eq!(first, again);
        }
    }
}
