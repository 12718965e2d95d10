//! Stage 4: one precedent with a fact-searched summary.

use counsel_coordination::{
    finish_summary, Candidate, Hyperlink, Precedent, PrecedentRecord, PrecedentStatus, Stage,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{BuildStatus, DeepBuildPipeline, StageOutcome};
use crate::errors::BuildError;
use crate::gateway::{CallKind, SearchHit};
use crate::prompts::render;

pub(crate) const PRECEDENT_LINK_LABEL: &str = "View related precedent";

/// Summary and source from the first hit with content; the record's own link
/// stands in when the search returns no URL.
fn summarize(record: &PrecedentRecord, hits: &[SearchHit]) -> (String, String) {
    let best = hits.iter().find(|h| !h.content.trim().is_empty());
    let summary = finish_summary(best.map(|h| h.content.as_str()).unwrap_or(""));
    let source_url = best
        .map(|h| h.url.trim())
        .filter(|u| !u.is_empty())
        .or(record.external_link.as_deref())
        .unwrap_or("")
        .to_string();
    (summary, source_url)
}

impl DeepBuildPipeline {
    pub(crate) async fn retrieve_precedent(
        &self,
        candidate: &Candidate,
        keywords: &[String],
        cancel: &CancellationToken,
    ) -> Result<StageOutcome<Precedent>, BuildError> {
        let stage = Stage::Precedent;
        let categories = [candidate.category.clone()];
        let titles = [candidate.title.clone()];
        let records = self
            .policy
            .run(CallKind::Search, cancel, || {
                self.records.find_precedent(&categories, &titles, keywords)
            })
            .await
            .map_err(|e| BuildError::gateway(stage, e))?;

        let Some(record) = records.into_iter().next() else {
            info!(category = %candidate.category, "no precedent found");
            return Ok(StageOutcome::Stop(BuildStatus::NotFound));
        };
        if record
            .external_link
            .as_deref()
            .filter(|link| !link.trim().is_empty())
            .is_none()
        {
            info!(case_number = %record.case_number, "precedent has no external link");
            return Ok(StageOutcome::Stop(BuildStatus::PrecedentMissing));
        }

        let search_query = render(
            &self.prompts.precedent_search,
            &[
                ("case_number", record.case_number.as_str()),
                ("court", record.court.as_str()),
                ("title", record.title.as_str()),
            ],
        );
        let hits = self
            .policy
            .run(CallKind::Search, cancel, || self.fact_search.search(&search_query))
            .await
            .map_err(|e| BuildError::gateway(stage, e))?;

        let (summary, source_url) = summarize(&record, &hits);
        debug!(case_number = %record.case_number, hits = hits.len(), "precedent summarized");

        let hyperlinks = if source_url.is_empty() {
            Vec::new()
        } else {
            vec![Hyperlink::new(PRECEDENT_LINK_LABEL, source_url.clone())]
        };
        Ok(StageOutcome::Done(Precedent {
            summary,
            source_url,
            record,
            hyperlinks,
            status: PrecedentStatus::Ok,
        }))
    }
}
