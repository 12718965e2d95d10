//! Sentinel marker parsing.
//!
//! Triage output carries its control signal as a literal trailing marker
//! (`###yes` / `###no` by default). Every consumer goes through
//! [`SentinelMarkers::parse`]; nothing else in the workspace inspects model
//! text for markers.
//!
//! ```text
//! "... answer text\n###yes"     → Affirm
//! "... answer text `###no`."    → Negative   (decoration trimmed)
//! "... answer text"             → None       (absence is not an error)
//! "... answer text\n###maybe"   → Malformed  (garbled control token)
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_AFFIRM_MARKER: &str = "###yes";
pub const DEFAULT_NEGATIVE_MARKER: &str = "###no";

/// Machine-readable signal carried by a triage response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentinel {
    Affirm,
    Negative,
    None,
}

impl std::fmt::Display for Sentinel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Affirm => write!(f, "affirm"),
            Self::Negative => write!(f, "negative"),
            Self::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SentinelError {
    /// The final line carries something shaped like a marker that is neither.
    #[error("malformed sentinel token `{token}`")]
    Malformed { token: String },
}

/// Result of a successful parse: the signal plus the text with the marker removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSentinel {
    pub sentinel: Sentinel,
    pub body: String,
}

/// The configured affirm/negative marker pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelMarkers {
    pub affirm: String,
    pub negative: String,
}

impl Default for SentinelMarkers {
    fn default() -> Self {
        Self {
            affirm: DEFAULT_AFFIRM_MARKER.to_string(),
            negative: DEFAULT_NEGATIVE_MARKER.to_string(),
        }
    }
}

fn is_decoration(c: char) -> bool {
    c.is_whitespace() || matches!(c, '`' | '"' | '\'' | '*' | '.' | '!')
}

/// Case-insensitive ASCII suffix match that respects char boundaries.
fn strip_suffix_ignore_case<'a>(text: &'a str, suffix: &str) -> Option<&'a str> {
    if suffix.is_empty() || text.len() < suffix.len() {
        return None;
    }
    let split = text.len() - suffix.len();
    if !text.is_char_boundary(split) {
        return None;
    }
    text[split..]
        .eq_ignore_ascii_case(suffix)
        .then(|| &text[..split])
}

impl SentinelMarkers {
    pub fn new(affirm: impl Into<String>, negative: impl Into<String>) -> Self {
        Self {
            affirm: affirm.into(),
            negative: negative.into(),
        }
    }

    /// Markers must be non-empty and distinct, and neither may end the other.
    pub fn validate(&self) -> Result<(), String> {
        if self.affirm.trim().is_empty() || self.negative.trim().is_empty() {
            return Err("sentinel markers must not be empty".to_string());
        }
        let a = self.affirm.to_ascii_lowercase();
        let n = self.negative.to_ascii_lowercase();
        if a.ends_with(&n) || n.ends_with(&a) {
            return Err(format!(
                "sentinel markers `{}` and `{}` are ambiguous",
                self.affirm, self.negative
            ));
        }
        Ok(())
    }

    /// Common leading characters of both markers (e.g. `###`).
    fn shared_prefix(&self) -> &str {
        let len = self
            .affirm
            .char_indices()
            .zip(self.negative.chars())
            .take_while(|((_, a), b)| a.eq_ignore_ascii_case(b))
            .last()
            .map(|((i, a), _)| i + a.len_utf8())
            .unwrap_or(0);
        &self.affirm[..len]
    }

    /// Parse the trailing marker of a complete triage response.
    pub fn parse(&self, raw: &str) -> Result<ParsedSentinel, SentinelError> {
        let trimmed = raw.trim_end_matches(is_decoration);

        for (marker, sentinel) in [
            (self.affirm.as_str(), Sentinel::Affirm),
            (self.negative.as_str(), Sentinel::Negative),
        ] {
            if let Some(rest) = strip_suffix_ignore_case(trimmed, marker) {
                return Ok(ParsedSentinel {
                    sentinel,
                    body: rest
                        .trim_end_matches(|c: char| c.is_whitespace() || c == '`')
                        .to_string(),
                });
            }
        }

        let prefix = self.shared_prefix();
        let last_line = trimmed.lines().last().unwrap_or("");
        if !prefix.trim().is_empty() {
            // `### Heading` is markdown, `###maybe` is a garbled marker.
            let garbled = last_line.match_indices(prefix).find_map(|(pos, _)| {
                let token = last_line[pos..].split_whitespace().next()?;
                token
                    .get(prefix.len()..)?
                    .starts_with(|c: char| c.is_alphanumeric())
                    .then(|| token.to_string())
            });
            if let Some(token) = garbled {
                return Err(SentinelError::Malformed { token });
            }
        }

        Ok(ParsedSentinel {
            sentinel: Sentinel::None,
            body: raw.trim_end().to_string(),
        })
    }

    /// Whether the last `window` characters of a partial stream end with the
    /// negative marker. Used for early stream termination only.
    pub fn trailing_negative(&self, buffer: &str, window: usize) -> bool {
        let start = buffer
            .char_indices()
            .rev()
            .nth(window.saturating_sub(1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let tail = buffer[start..].trim_end_matches(is_decoration);
        strip_suffix_ignore_case(tail, &self.negative).is_some()
    }
}
