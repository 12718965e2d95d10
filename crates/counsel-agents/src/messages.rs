//! Literal user-facing text for every terminal status.
//!
//! Raw error text never reaches the user; it is logged where it happens.

use crate::coordinator::TurnStatus;
use crate::pipeline::BuildStatus;

pub const NONLEGAL_SKIPPED: &str =
    "This question does not look like a legal matter, so no in-depth answer was prepared.";
pub const NEGATIVE_TRIGGERED: &str =
    "The question needs more detail before an in-depth answer can be prepared.";
pub const WAIT_FOR_BUILD: &str =
    "An in-depth answer for this conversation is still being prepared. Please try again shortly.";
pub const CACHED_ADVANCED_RETURNED: &str =
    "An in-depth answer was just prepared for this conversation; here it is.";

pub const FAIL_QUALIFIER: &str = "No related consultation was found for this question.";
pub const NOT_FOUND: &str = "No related precedent could be found.";
pub const PRECEDENT_MISSING: &str = "The related precedent has no source link to summarize.";
pub const BUILD_CANCELLED: &str = "The in-depth answer was cancelled.";
pub const BUILD_FAILED: &str =
    "The in-depth answer could not be prepared right now. The quick answer above still applies.";

/// Notice shown next to the cheap response, if the status needs one.
pub fn for_turn(status: TurnStatus) -> Option<&'static str> {
    match status {
        TurnStatus::Ok => None,
        TurnStatus::NonlegalSkipped => Some(NONLEGAL_SKIPPED),
        TurnStatus::NegativeTriggered => Some(NEGATIVE_TRIGGERED),
        TurnStatus::WaitForBuild => Some(WAIT_FOR_BUILD),
        TurnStatus::CachedAdvancedReturned => Some(CACHED_ADVANCED_RETURNED),
    }
}

/// Notice for a deep build that ended without an answer.
pub fn for_build(status: BuildStatus) -> Option<&'static str> {
    match status {
        BuildStatus::Ok => None,
        BuildStatus::FailQualifier => Some(FAIL_QUALIFIER),
        BuildStatus::NotFound => Some(NOT_FOUND),
        BuildStatus::PrecedentMissing => Some(PRECEDENT_MISSING),
        BuildStatus::Cancelled => Some(BUILD_CANCELLED),
        BuildStatus::Failed => Some(BUILD_FAILED),
    }
}
