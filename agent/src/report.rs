//! Problem report value objects
//!
//! A [`ProblemReport`] describes the outcome of one health check:
//! whether it currently flags a problem, a short diagnosis label, and
//! a long-form detail blob escaped for direct embedding in markup.
//! Two reports are "the same problem" regardless of when they were
//! detected, so equality deliberately ignores the creation timestamp.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemReport {
    /// Whether the check currently flags a problem
    pub problem: bool,
    /// Short human label for the check
    pub diagnosis: String,
    /// Long-form detail, HTML-escaped at construction
    pub detail: String,
    /// When the report was produced. Not part of value equality.
    pub created: DateTime<Utc>,
}

impl ProblemReport {
    /// Build a report, escaping the raw detail text for markup
    pub fn new(problem: bool, diagnosis: impl Into<String>, raw_detail: &str) -> Self {
        Self {
            problem,
            diagnosis: diagnosis.into(),
            detail: html_escape(raw_detail),
            created: Utc::now(),
        }
    }

    /// Non-problem report for a check that ran clean or could not
    /// obtain data
    pub fn ok(diagnosis: impl Into<String>, raw_detail: &str) -> Self {
        Self::new(false, diagnosis, raw_detail)
    }

    /// Problem report
    pub fn problem(diagnosis: impl Into<String>, raw_detail: &str) -> Self {
        Self::new(true, diagnosis, raw_detail)
    }
}

impl PartialEq for ProblemReport {
    /// Value equality over `problem`, `diagnosis` and `detail`;
    /// `created` never participates.
    fn eq(&self, other: &Self) -> bool {
        self.problem == other.problem
            && self.diagnosis == other.diagnosis
            && self.detail == other.detail
    }
}

impl Eq for ProblemReport {}

impl fmt::Display for ProblemReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            if self.problem { "PROBLEM" } else { "ok" },
            self.diagnosis
        )
    }
}

/// Sequence-wise equality over two ordered report lists
pub fn reports_equal(a: &[ProblemReport], b: &[ProblemReport]) -> bool {
    a == b
}

/// Whether any report in the sequence flags a problem
pub fn any_problem(reports: &[ProblemReport]) -> bool {
    reports.iter().any(|r| r.problem)
}

/// Escape text for embedding in HTML markup
pub fn html_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
