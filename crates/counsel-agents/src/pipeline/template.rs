//! Stage 2: answer skeleton from the selected consultation.

use counsel_coordination::{Candidate, Stage, Template};
use tokio_util::sync::CancellationToken;

use super::DeepBuildPipeline;
use crate::errors::BuildError;
use crate::gateway::{CallKind, CallPurpose, CompletionRequest};
use crate::parse::parse_json;

impl DeepBuildPipeline {
    pub(crate) async fn plan_template(
        &self,
        query: &str,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> Result<Template, BuildError> {
        let (system, user) = self.prompts.template.render(&[
            ("query", query),
            ("title", candidate.title.as_str()),
            ("question", candidate.question.as_str()),
            ("answer", candidate.answer.as_str()),
        ]);
        let request = CompletionRequest::new(CallPurpose::Template, system, user);
        let reply = self
            .policy
            .run(CallKind::Stage, cancel, || self.completion.complete(request.clone()))
            .await
            .map_err(|e| BuildError::gateway(Stage::Template, e))?;

        let mut template: Template =
            parse_json(&reply).map_err(|e| BuildError::parse(Stage::Template, e))?;
        if template.ref_question.trim().is_empty() {
            template.ref_question = candidate.question.clone();
        }
        Ok(template)
    }
}
