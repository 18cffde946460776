//! Heuristic complexity delta per file.
//!
//! Every file gets the churn proxy `(additions - deletions) * 0.1`. Languages
//! with a keyword list additionally add `0.5` per branching/looping token on
//! an added line and subtract `0.5` per token on a removed line.
//!
//! The analyzer never fails. An unreadable patch degrades to the churn proxy
//! with `analysis_success = false`.

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;

use crate::models::FileChange;
use crate::patch::split_patch;

pub const CHURN_WEIGHT: f64 = 0.1;
pub const DECISION_POINT_WEIGHT: f64 = 0.5;

/// Word-like decision keywords, matched on word boundaries.
const KEYWORDS: &[(&str, &[&str])] = &[
    ("python", &["if", "elif", "for", "while", "except", "and", "or"]),
    ("javascript", &["if", "for", "while", "case", "catch"]),
    ("typescript", &["if", "for", "while", "case", "catch"]),
    ("java", &["if", "for", "while", "case", "catch"]),
    ("go", &["if", "for", "case", "select"]),
    ("rust", &["if", "for", "while", "loop", "match"]),
];

/// Languages that also score `&&` and `||`.
const OPERATOR_LANGUAGES: &[&str] = &["javascript", "typescript", "java", "go", "rust"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComplexityResult {
    pub complexity_delta: f64,
    pub decision_points_added: u32,
    pub decision_points_removed: u32,
    pub analysis_success: bool,
}

impl ComplexityResult {
    fn churn_only(change: &FileChange, success: bool) -> Self {
        Self {
            complexity_delta: churn_delta(change),
            decision_points_added: 0,
            decision_points_removed: 0,
            analysis_success: success,
        }
    }
}

/// The coarse formula shared by every language.
pub fn churn_delta(change: &FileChange) -> f64 {
    (f64::from(change.additions) - f64::from(change.deletions)) * CHURN_WEIGHT
}

/// Per-language decision-point patterns, compiled once.
#[derive(Debug)]
pub struct ComplexityAnalyzer {
    patterns: HashMap<&'static str, Regex>,
}

impl Default for ComplexityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ComplexityAnalyzer {
    pub fn new() -> Self {
        let mut patterns = HashMap::new();
        for (language, words) in KEYWORDS {
            let mut alternatives = vec![format!(r"\b(?:{})\b", words.join("|"))];
            if OPERATOR_LANGUAGES.contains(language) {
                alternatives.push(r"&&|\|\|".to_string());
            }
            let pattern = alternatives.join("|");
            let regex = Regex::new(&pattern).expect("keyword patterns are valid");
            patterns.insert(*language, regex);
        }
        Self { patterns }
    }

    pub fn has_keywords(&self, language: &str) -> bool {
        self.patterns.contains_key(language)
    }

    pub fn analyze(&self, change: &FileChange, language: &str) -> ComplexityResult {
        let Some(pattern) = self.patterns.get(language) else {
            return ComplexityResult::churn_only(change, true);
        };
        let Some(patch) = change.patch.as_deref() else {
            return ComplexityResult::churn_only(change, true);
        };

        let lines = match split_patch(patch) {
            Ok(lines) => lines,
            Err(err) => {
                tracing::warn!(file = %change.filename, error = %err, "complexity analysis degraded to churn");
                return ComplexityResult::churn_only(change, false);
            }
        };

        let added = count_matches(pattern, &lines.added);
        let removed = count_matches(pattern, &lines.removed);
        let delta = churn_delta(change)
            + (f64::from(added) - f64::from(removed)) * DECISION_POINT_WEIGHT;

        if !delta.is_finite() {
            return ComplexityResult::churn_only(change, false);
        }

        ComplexityResult {
            complexity_delta: delta,
            decision_points_added: added,
            decision_points_removed: removed,
            analysis_success: true,
        }
    }
}

fn count_matches(pattern: &Regex, lines: &[&str]) -> u32 {
    lines
        .iter()
        .map(|line| strip_line_comment(line))
        .map(|line| pattern.find_iter(line).count() as u32)
        .sum()
}

/// Whole-line `#` and `//` comments score nothing.
fn strip_line_comment(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') || trimmed.starts_with("//") {
        return "";
    }
    line
}
