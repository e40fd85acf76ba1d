//! Turning probe outcomes into a grade.

use crate::{grader::model::GradeResult, probe::model::ProbeOutcome};
use err_derive::Error;
use std::fmt::Write;

/// Raised only when the scoring inputs are malformed, which means a bug in
/// the grader rather than in the submission.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScoringError {
    #[error(display = "No probe outcomes to score")]
    Empty,

    #[error(display = "Score of {} probes with weight {} overflows", _0, _1)]
    Overflow(usize, u32),
}

/// Score the outcomes of one submission.
///
/// Every successful probe is worth `weight` points. The submission passes iff
/// every probe succeeded; partial credit never passes.
pub fn score(
    url: &str,
    outcomes: Vec<ProbeOutcome>,
    weight: u32,
) -> Result<GradeResult, ScoringError> {
    if outcomes.is_empty() {
        return Err(ScoringError::Empty);
    }
    let max_score = u32::try_from(outcomes.len())
        .ok()
        .and_then(|count| count.checked_mul(weight))
        .ok_or(ScoringError::Overflow(outcomes.len(), weight))?;

    let mut score = 0;
    let mut details = String::new();
    for outcome in &outcomes {
        if outcome.success {
            score += weight;
            writeln!(details, "{} endpoint works", outcome.spec.name).ok();
        } else {
            writeln!(details, "{} endpoint failed", outcome.spec.name).ok();
        }
    }

    Ok(GradeResult {
        url: url.to_owned(),
        passed: score == max_score,
        score,
        max_score,
        details,
        failed_stage: None,
        outcomes,
        container_log: None,
        started_at: None,
        finished_at: None,
    })
}
