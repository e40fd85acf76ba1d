//! Functions to download stuff into destinations
use async_trait::async_trait;
use err_derive::Error;
use std::{path::Path, time::Duration};
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(display = "Failed to launch git: {}", _0)]
    Spawn(#[error(source)] std::io::Error),

    #[error(display = "git clone exited with code {:?}: {}", code, stderr)]
    Failed { code: Option<i32>, stderr: String },

    #[error(display = "git clone timed out after {:?}", _0)]
    Timeout(Duration),
}

/// Something that can put the sources of a submission into a directory.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch the repository at `url` into `dest`, which must be an empty
    /// directory.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError>;
}

#[derive(Debug, Clone)]
pub struct GitCloneOptions {
    /// `--depth` passed to `git clone`; `None` clones the full history
    pub depth: Option<usize>,
    pub timeout: Duration,
}

impl Default for GitCloneOptions {
    fn default() -> Self {
        GitCloneOptions {
            depth: Some(1),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Fetches sources by running `git clone`. No retries.
#[derive(Debug, Clone, Default)]
pub struct GitFetcher {
    pub options: GitCloneOptions,
}

// UNSAFE! This section calls directly into Unix `setpgrp` function to move the
// child process into a different process group, in order to avoid sending
// SIGINT into that process.
#[cfg(unix)]
extern "C" {
    fn setpgrp() -> i32;
}

/// Avoid the child process from receiving SIGINT. This only works for Unix systems
/// to avoid having the child exit earlier than this process.
#[cfg(unix)]
fn set_no_sigint_handler(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            setpgrp();
            Ok(())
        });
    }
}

/// Stub for other systems
#[cfg(not(unix))]
fn set_no_sigint_handler(_cmd: &mut Command) {}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        git_clone(url, dest, &self.options).await
    }
}

pub async fn git_clone(url: &str, dest: &Path, options: &GitCloneOptions) -> Result<(), FetchError> {
    let mut cmd = Command::new("git");
    cmd.arg("clone");
    if let Some(depth) = options.depth {
        cmd.arg("--depth").arg(depth.to_string());
    }
    cmd.arg("--")
        .arg(url)
        .arg(dest)
        // fail instead of asking for credentials on private or missing repos
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true);
    set_no_sigint_handler(&mut cmd);

    tracing::info!("Cloning {} into {}", url, dest.display());
    let output = tokio::time::timeout(options.timeout, cmd.output())
        .await
        .map_err(|_| FetchError::Timeout(options.timeout))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        return Err(FetchError::Failed {
            code: output.status.code(),
            stderr,
        });
    }
    Ok(())
}
