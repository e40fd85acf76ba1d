//! Grading a running submission with an external script.
//!
//! The script is given the submission's base URL as its last argument and
//! must print its verdict as one JSON object on the last non-empty line of
//! stdout:
//!
//! ```json
//! {"score": 30, "passed": false, "details": "Help endpoint works\n...", "max_score": 40}
//! ```

use crate::config::ScriptConfig;
use err_derive::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error(display = "Grading script is empty")]
    EmptyCommand,

    #[error(display = "Failed to launch grading script: {}", _0)]
    Spawn(#[error(source)] std::io::Error),

    #[error(display = "Grading script exited with code {:?}: {}", code, stderr)]
    Failed { code: Option<i32>, stderr: String },

    #[error(display = "Grading script timed out after {:?}", _0)]
    Timeout(Duration),

    #[error(display = "Malformed grading script output: {}", _0)]
    Malformed(String),
}

/// The verdict of a grading script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptReport {
    pub score: u32,
    pub passed: bool,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub max_score: Option<u32>,
}

/// Find the report in a script's stdout.
pub fn parse_report(stdout: &str) -> Result<ScriptReport, ScriptError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .ok_or_else(|| ScriptError::Malformed("no output".into()))?;
    serde_json::from_str(line).map_err(|e| ScriptError::Malformed(format!("{}: {:?}", e, line)))
}

/// Run the grading script against the server at `base_url`.
#[tracing::instrument(skip(cfg))]
pub async fn run_script(cfg: &ScriptConfig, base_url: &str) -> Result<ScriptReport, ScriptError> {
    let (program, args) = cfg.command.split_first().ok_or(ScriptError::EmptyCommand)?;
    let timeout = Duration::from_secs(cfg.timeout_secs);

    let mut cmd = Command::new(program);
    cmd.args(args).arg(base_url).kill_on_drop(true);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| ScriptError::Timeout(timeout))??;
    let stdout = String::from_utf8_lossy(&output.stdout);
    tracing::debug!("Grading script output:\n{}", stdout);

    if !output.status.success() {
        return Err(ScriptError::Failed {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    parse_report(&stdout)
}
