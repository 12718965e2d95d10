//! Frequency-ranked keyword extraction.
//!
//! Stand-in for a morphological analyzer: words are split on Unicode letter
//! and digit runs, common Korean particles are stripped from the end of each
//! word, stopwords and one-character tokens are dropped, and the remainder is
//! ranked by count (ties by first occurrence).

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Particles stripped from word endings, longest first.
const PARTICLES: &[&str] = &[
    "에서는", "으로는", "에게서", "까지", "부터", "에서", "에게", "한테", "으로", "이나",
    "처럼", "은", "는", "이", "가", "을", "를", "에", "의", "로", "와", "과", "도", "만", "나",
];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "what", "how", "can", "does", "with", "that", "this",
    "have", "from", "you", "your", "about", "please", "어떻게", "무엇", "있나요", "있을까요",
    "해야", "하나요", "알려줘", "알려주세요", "경우", "그리고", "그런데", "제가", "저는",
];

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("WORD_RE regex should compile"));

#[derive(Debug, Clone, Default)]
pub struct LexicalKeywordExtractor;

impl LexicalKeywordExtractor {
    pub fn new() -> Self {
        Self
    }

    fn normalize(word: &str) -> Option<String> {
        let lowered = word.to_lowercase();
        let mut stem = lowered.as_str();
        for p in PARTICLES {
            if let Some(s) = stem.strip_suffix(p) {
                if s.chars().count() >= 2 {
                    stem = s;
                    break;
                }
            }
        }
        if stem.chars().count() < 2 || STOPWORDS.contains(&stem) {
            return None;
        }
        if stem.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(stem.to_string())
    }

    /// Up to `top_k` keywords, most frequent first.
    pub fn extract(&self, text: &str, top_k: usize) -> Vec<String> {
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        for (idx, m) in WORD_RE.find_iter(text).enumerate() {
            if let Some(word) = Self::normalize(m.as_str()) {
                counts.entry(word).or_insert((0, idx)).0 += 1;
            }
        }
        let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
        ranked.into_iter().take(top_k).map(|(w, _)| w).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_by_frequency_then_position() {
        let ex = LexicalKeywordExtractor::new();
        let kw = ex.extract("lease deposit lease landlord deposit lease", 3);
        assert_eq!(kw, vec!["lease", "deposit", "landlord"]);
    }

    #[test]
    fn strips_korean_particles() {
        let ex = LexicalKeywordExtractor::new();
        let kw = ex.extract("보증금을 돌려받지 못했습니다. 보증금은 어떻게 되나요", 2);
        assert_eq!(kw[0], "보증금");
    }

    #[test]
    fn drops_stopwords_and_short_tokens() {
        let ex = LexicalKeywordExtractor::new();
        assert!(ex.extract("a I the how 1 22", 5).is_empty());
    }

    #[test]
    fn top_k_limits() {
        let ex = LexicalKeywordExtractor::new();
        assert_eq!(ex.extract("alpha beta gamma delta", 2).len(), 2);
    }
}
