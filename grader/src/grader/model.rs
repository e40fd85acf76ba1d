use crate::{fs::WorkspaceManager, probe::model::ProbeOutcome, script::ScriptReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, path::PathBuf};

/// A step of the grading pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Workspace,
    Fetch,
    Build,
    Run,
    Probe,
    /// Grading was cancelled before this submission could finish
    Cancelled,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Workspace => "workspace",
            Stage::Fetch => "fetch",
            Stage::Build => "build",
            Stage::Run => "run",
            Stage::Probe => "probe",
            Stage::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Final grading outcome of one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResult {
    pub url: String,
    pub passed: bool,
    pub score: u32,
    pub max_score: u32,
    /// One line per probe, or the reason the pipeline stopped early
    pub details: String,
    /// The stage that stopped the pipeline, if any
    pub failed_stage: Option<Stage>,
    #[serde(default)]
    pub outcomes: Vec<ProbeOutcome>,
    /// Tail of the container's output, kept when the submission did not pass
    #[serde(default)]
    pub container_log: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl GradeResult {
    /// A zero-score result for a submission that failed at `stage`.
    pub fn failed(url: &str, stage: Stage, max_score: u32, reason: impl Display) -> GradeResult {
        GradeResult {
            url: url.to_owned(),
            passed: false,
            score: 0,
            max_score,
            details: format!("{} failed: {}\n", stage, reason),
            failed_stage: Some(stage),
            outcomes: vec![],
            container_log: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn from_script(url: &str, report: ScriptReport, max_score: u32) -> GradeResult {
        GradeResult {
            url: url.to_owned(),
            passed: report.passed,
            score: report.score,
            max_score: report.max_score.unwrap_or(max_score),
            details: report.details,
            failed_stage: None,
            outcomes: vec![],
            container_log: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Everything that identifies one submission inside a batch. Passed
/// explicitly through the pipeline so concurrent submissions never share
/// names, ports or directories.
#[derive(Debug, Clone)]
pub struct SubmissionContext {
    pub index: usize,
    pub url: String,
    pub container_name: String,
    pub image_tag: String,
    pub host_port: u16,
    pub workspace: WorkspaceManager,
}

/// A checked-out submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub url: String,
    pub path: PathBuf,
}

/// Progress of a batch, for whoever presents it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradeEvent {
    Started { index: usize, url: String },
    Stage { index: usize, stage: Stage },
    Finished { index: usize, passed: bool, score: u32 },
}
