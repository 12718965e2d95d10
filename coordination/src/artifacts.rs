//! Deep-build artifacts.
//!
//! Each stage of the deep pipeline produces exactly one of these. Once stored
//! in the session cache an artifact is never replaced, only cleared together
//! with the rest of the entry.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Placeholder used when fact search returns no usable precedent summary.
pub const EMPTY_PRECEDENT_SUMMARY: &str = "No precedent summary was provided.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hyperlink {
    pub label: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
}

impl Hyperlink {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            tooltip: None,
        }
    }
}

/// A prior consultation selected by the qualify stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: i64,
    pub title: String,
    pub question: String,
    pub answer: String,
    pub category: String,
}

/// Answer skeleton derived from the selected candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub summary: String,
    pub explanation: String,
    #[serde(default)]
    pub ref_question: String,
    #[serde(default)]
    pub hyperlinks: Vec<Hyperlink>,
}

impl Template {
    pub fn linked_summary(&self) -> String {
        insert_hyperlinks(&self.summary, &self.hyperlinks)
    }

    pub fn linked_explanation(&self) -> String {
        insert_hyperlinks(&self.explanation, &self.hyperlinks)
    }
}

/// Outcome of the bounded critique-revise loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    pub needs_revision: bool,
    #[serde(default)]
    pub reason: String,
    /// The strategy body was replaced by the single allowed revision.
    #[serde(default)]
    pub revised: bool,
}

/// How the final answer should be shaped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub structure: String,
    #[serde(default)]
    pub decision_tree: Vec<String>,
    pub final_strategy_summary: String,
    #[serde(default)]
    pub recommended_links: Vec<Hyperlink>,
    #[serde(default)]
    pub critique: Critique,
}

/// One row returned by the precedent search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecedentRecord {
    pub id: i64,
    pub case_number: String,
    #[serde(default)]
    pub title: String,
    pub court: String,
    pub date: String,
    pub external_link: Option<String>,
}

impl PrecedentRecord {
    /// `court / date / title`, used as one line of the generation prompt.
    pub fn meta_line(&self) -> String {
        format!("{} / {} / {}", self.court, self.date, self.title)
    }
}

/// Terminal status of the precedent stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecedentStatus {
    Ok,
    NotFound,
    PrecedentMissing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precedent {
    pub summary: String,
    pub source_url: String,
    pub record: PrecedentRecord,
    #[serde(default)]
    pub hyperlinks: Vec<Hyperlink>,
    pub status: PrecedentStatus,
}

/// Replace the first whole-word occurrence of each label with an anchor.
///
/// Links with an empty label or url are skipped. Labels that never occur
/// leave the text untouched.
pub fn insert_hyperlinks(text: &str, links: &[Hyperlink]) -> String {
    let mut out = text.to_string();
    for link in links {
        if link.label.is_empty() || link.url.is_empty() {
            continue;
        }
        let pattern = format!(r"\b{}\b", regex::escape(&link.label));
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        let anchor = format!(
            r#"<a href="{}" title="{}">{}</a>"#,
            link.url,
            link.tooltip.as_deref().unwrap_or(""),
            link.label
        );
        out = re.replacen(&out, 1, regex::NoExpand(&anchor)).into_owned();
    }
    out
}

/// Close a summary that was cut mid-sentence.
///
/// Summaries ending in a period or a Korean sentence ending (`다`, `요`) are
/// kept; anything else gets an ellipsis. Blank input yields the placeholder.
pub fn finish_summary(text: &str) -> String {
    let cleaned = text.trim();
    if cleaned.is_empty() {
        return EMPTY_PRECEDENT_SUMMARY.to_string();
    }
    if cleaned.ends_with(['.', '다', '요']) {
        cleaned.to_string()
    } else {
        format!("{cleaned}...")
    }
}
