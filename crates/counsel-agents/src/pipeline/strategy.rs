//! Stage 3: response strategy, then the bounded critique-revise loop.

use counsel_coordination::{Hyperlink, Stage, Strategy, Template};
use tokio_util::sync::CancellationToken;

use super::DeepBuildPipeline;
use crate::errors::BuildError;
use crate::gateway::{CallKind, CallPurpose, CompletionRequest};
use crate::parse::parse_json;

pub(crate) fn link_lines(links: &[Hyperlink]) -> String {
    if links.is_empty() {
        return "(none)".to_string();
    }
    links
        .iter()
        .map(|l| format!("- {}: {}", l.label, l.url))
        .collect::<Vec<_>>()
        .join("\n")
}

impl DeepBuildPipeline {
    pub(crate) async fn plan_strategy(
        &self,
        query: &str,
        template: &Template,
        cancel: &CancellationToken,
    ) -> Result<Strategy, BuildError> {
        let links = link_lines(&template.hyperlinks);
        let (system, user) = self.prompts.strategy.render(&[
            ("query", query),
            ("explanation", template.explanation.as_str()),
            ("hyperlinks", links.as_str()),
        ]);
        let request = CompletionRequest::new(CallPurpose::Strategy, system, user);
        let reply = self
            .policy
            .run(CallKind::Stage, cancel, || self.completion.complete(request.clone()))
            .await
            .map_err(|e| BuildError::gateway(Stage::Strategy, e))?;

        let strategy: Strategy =
            parse_json(&reply).map_err(|e| BuildError::parse(Stage::Strategy, e))?;
        self.critique.refine(query, strategy, cancel).await
    }
}
