//! Decoding structured model output.
//!
//! Models wrap JSON in prose or code fences. Everything here locates the
//! payload first and then hands it to serde.

use serde::de::DeserializeOwned;

/// The outermost `{ ... }` span, from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a JSON object out of free text.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    let span = extract_json_object(trimmed).ok_or_else(|| "no JSON object in output".to_string())?;
    serde_json::from_str(span).map_err(|e| e.to_string())
}

/// Outcome of the choose call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    /// Zero-based index into the presented candidates
    Selected(usize),
    /// `[]` or `[0]`: nothing fits
    NoneFits,
    /// Out of range or unparsable
    Invalid,
}

/// Read a one-based JSON index array such as `[2]`.
pub fn parse_choice(text: &str, candidates: usize) -> Choice {
    let trimmed = text.trim();
    let span = match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(s), Some(e)) if e > s => &trimmed[s..=e],
        _ => return Choice::Invalid,
    };
    let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(span) else {
        return Choice::Invalid;
    };
    let Some(first) = values.first() else {
        return Choice::NoneFits;
    };
    let n = match first {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    match n {
        Some(0) => Choice::NoneFits,
        Some(n) if n >= 1 && (n as usize) <= candidates => Choice::Selected(n as usize - 1),
        _ => Choice::Invalid,
    }
}

/// Whether a relevance reply says `relevant` (and not `irrelevant`).
pub fn parse_relevance(text: &str) -> bool {
    let word = text
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    word == "relevant"
}
