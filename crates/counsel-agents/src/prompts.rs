//! Prompt templates, one per call purpose.
//!
//! Templates use `{name}` placeholders filled by [`render`]. Only known
//! identifiers are substituted, so literal JSON braces in a template survive
//! untouched. Every template can be overridden from the `[prompts]` table of
//! the config file.

use serde::{Deserialize, Serialize};

/// System + user message pair for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePrompt {
    pub system: String,
    pub user: String,
}

impl StagePrompt {
    fn new(system: &str, user: &str) -> Self {
        Self {
            system: system.trim().to_string(),
            user: user.trim().to_string(),
        }
    }

    /// Render the user message; the system message is used verbatim.
    pub fn render(&self, vars: &[(&str, &str)]) -> (String, String) {
        (self.system.clone(), render(&self.user, vars))
    }
}

/// Substitute `{name}` placeholders in one pass.
///
/// Substituted values are never re-scanned, and placeholders without a
/// matching variable are left as written.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}');
        let name = close.map(|c| &after[..c]);
        match name.and_then(|n| {
            let is_ident = !n.is_empty() && n.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            is_ident
                .then(|| vars.iter().find(|(k, _)| *k == n))
                .flatten()
        }) {
            Some((name, value)) => {
                out.push_str(value);
                rest = &after[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// All prompt templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    pub triage: StagePrompt,
    pub relevance: StagePrompt,
    pub choose: StagePrompt,
    pub template: StagePrompt,
    pub strategy: StagePrompt,
    pub evaluate_strategy: StagePrompt,
    pub revise_strategy: StagePrompt,
    /// Fact-search query used to summarize the chosen precedent.
    pub precedent_search: String,
    pub generation: StagePrompt,
    pub answer_critique: StagePrompt,
}

impl PromptTemplates {
    /// Every user template must mention the placeholders its stage relies on.
    pub fn validate(&self) -> Result<(), String> {
        let required: [(&str, &StagePrompt, &[&str]); 9] = [
            ("triage", &self.triage, &["{query}", "{affirm_marker}", "{negative_marker}"]),
            ("relevance", &self.relevance, &["{query}", "{candidates}"]),
            ("choose", &self.choose, &["{query}", "{candidates}"]),
            ("template", &self.template, &["{query}", "{answer}"]),
            ("strategy", &self.strategy, &["{query}", "{explanation}"]),
            ("evaluate_strategy", &self.evaluate_strategy, &["{strategy_summary}", "{snippets}"]),
            ("revise_strategy", &self.revise_strategy, &["{strategy_summary}", "{snippets}"]),
            ("generation", &self.generation, &["{query}"]),
            ("answer_critique", &self.answer_critique, &["{answer}", "{snippets}"]),
        ];
        for (name, prompt, placeholders) in required {
            if let Some(missing) = placeholders.iter().find(|p| !prompt.user.contains(*p)) {
                return Err(format!("prompts.{name}.user is missing placeholder {missing}"));
            }
        }
        if self.precedent_search.trim().is_empty() {
            return Err("prompts.precedent_search must not be empty".to_string());
        }
        Ok(())
    }
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            triage: StagePrompt::new(
                "You are a legal expert for Korean law. Answer clearly and concisely.",
                r#"
Conversation so far:
{history}

User question:
"{query}"

Keywords in the question: {query_keywords}
Keywords from related material: {context_keywords}
Question type: {query_class}
Legal relevance score: {relevance}

Instructions:
- If the question type is "in_scope", ground the answer in concrete statutes or precedents.
- If the question type is "out_of_scope", say the legal relevance is low and point to related provisions if any.
- On the last line write `{affirm_marker}` if the question is legally clear enough to answer in depth, otherwise `{negative_marker}`.
"#,
            ),
            relevance: StagePrompt::new(
                "You judge whether prior consultations are on the same topic as a user question.",
                r#"
User question:
"{query}"

Prior consultations (title and question):
{candidates}

If every consultation above is unrelated to the user question, answer only "irrelevant".
If at least one is related, answer only "relevant".
"#,
            ),
            choose: StagePrompt::new(
                "You curate legal consultation data.",
                r#"
User question:
"{query}"

Candidate consultations (numbered from 1):
{candidates}

Pick the single consultation that best answers the user question.
Reply with a JSON array holding only its number, for example [2].
If none fits, reply with [].
"#,
            ),
            template: StagePrompt::new(
                "You build answer templates for legal consultations.",
                r#"
User question:
"{query}"

Consultation title: "{title}"
Consultation question: "{question}"
Consultation answer: "{answer}"

1. Summarize the key point for a layperson (summary).
2. Explain the answer in plain language (explanation).
3. List related statutes or precedents as links with label and url (hyperlinks).
4. Return the consultation question as ref_question.

Reply with JSON only:
{"summary": "...", "explanation": "...", "hyperlinks": [{"label": "...", "url": "..."}], "ref_question": "..."}
"#,
            ),
            strategy: StagePrompt::new(
                "You design response strategies for legal answers.",
                r#"
User question:
"{query}"

Draft explanation:
"{explanation}"

Related links:
{hyperlinks}

1. Choose a tone suited to the user.
2. Describe the flow of the answer.
3. Express conditions and exceptions as a decision_tree list.
4. Summarize the whole strategy.
5. List recommended links.

Reply with JSON only:
{"tone": "...", "structure": "...", "decision_tree": ["..."], "final_strategy_summary": "...", "recommended_links": [{"label": "...", "url": "..."}]}
"#,
            ),
            evaluate_strategy: StagePrompt::new(
                "You compare an answer strategy against legal source summaries.",
                r#"
Strategy summary:
{strategy_summary}

Source summaries:
{snippets}

The strategy needs revision if the sources cite statutes or key points it ignores, or if it is vague.

Reply with JSON only:
{"needs_revision": true, "reason": "..."}
"#,
            ),
            revise_strategy: StagePrompt::new(
                "You improve legal answer strategies.",
                r#"
The strategy below is vague or misses key information. Revise it using the source summaries.

Source summaries:
{snippets}

Current strategy summary:
{strategy_summary}

Keep the JSON structure. Reply with JSON only:
{"tone": "...", "structure": "...", "decision_tree": ["..."], "final_strategy_summary": "...", "recommended_links": [{"label": "...", "url": "..."}]}
"#,
            ),
            precedent_search: "{case_number} {court} {title} 판례 요약".to_string(),
            generation: StagePrompt::new(
                "You write advanced legal consultations. Be accurate and natural so the user can trust the answer.",
                r#"
[Conversation]
{history}

[User question]
{query}

[Summary]
{summary}

[Explanation]
{explanation}

[Reference question]
{ref_question}

[Links]
{hyperlinks}

[Strategy summary]
{strategy_summary}

[Answer strategy]
- Tone: {tone}
- Flow: {structure}
- Decision tree:
{decision_tree}

[Recommended links]
{recommended_links}

[Precedent]
- {precedent_summary}
- Link: {precedent_link}
- Details: {precedent_meta}

Write a consultation the user can rely on, continuing the conversation above.
"#,
            ),
            answer_critique: StagePrompt::new(
                "You review legal answers against source summaries.",
                r#"
User question:
{query}

Final answer:
{answer}

Source summaries:
{snippets}

Point out logical gaps or errors compared to the sources.

Reply with JSON only:
{"needs_fix": false, "reason": "...", "fix_suggestion": "..."}
"#,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_known_names() {
        let out = render("Q: {query} / {missing}", &[("query", "hello")]);
        assert_eq!(out, "Q: hello / {missing}");
    }

    #[test]
    fn render_leaves_json_braces() {
        let out = render(r#"{"a": 1} {x}"#, &[("x", "y")]);
        assert_eq!(out, r#"{"a": 1} y"#);
    }

    #[test]
    fn render_does_not_rescan_values() {
        let out = render("{a}{b}", &[("a", "{b}"), ("b", "B")]);
        assert_eq!(out, "{b}B");
    }

    #[test]
    fn render_unclosed_brace() {
        assert_eq!(render("tail {query", &[("query", "q")]), "tail {query");
    }

    #[test]
    fn defaults_validate() {
        assert!(PromptTemplates::default().validate().is_ok());
    }

    #[test]
    fn override_missing_placeholder_rejected() {
        let mut p = PromptTemplates::default();
        p.choose.user = "pick one".into();
        assert!(p.validate().unwrap_err().contains("choose"));
    }
}
