//! File-system-related stuff. Including managing submission workspaces and
//! performing git operations.

use crate::util::path_security::enforce_child_path;
use err_derive::Error;
use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};

pub mod net;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(display = "Cannot derive a workspace name from {:?}", _0)]
    InvalidName(String),

    #[error(display = "Workspace {} exists and cannot be cleared: {}", _0, _1)]
    Occupied(String, #[error(source, no_from)] std::io::Error),

    #[error(display = "IO error: {}", _0)]
    Io(#[error(source)] std::io::Error),
}

/// Owns the directories submissions are checked out into.
///
/// Every submission gets `<root>/<repository name>`; two submissions graded
/// at the same time must use different roots.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let root = root.as_ref().absolutize()?.into_owned();
        Ok(WorkspaceManager { root })
    }

    /// A manager rooted in a sub-folder of this one.
    pub fn child(&self, name: &str) -> WorkspaceManager {
        WorkspaceManager {
            root: self.root.join(name),
        }
    }

    /// Create a fresh, empty directory for the repository at `url`. An
    /// existing directory of the same name is cleared first.
    pub async fn prepare(&self, url: &str) -> Result<PathBuf, WorkspaceError> {
        let name = repo_name(url)?;
        let path = self.root.join(name);

        tokio::fs::create_dir_all(&self.root).await?;
        if tokio::fs::metadata(&path).await.is_ok() {
            tracing::debug!(path = %path.display(), "Clearing stale workspace");
            remove_dir_if_exists(&path)
                .await
                .map_err(|e| WorkspaceError::Occupied(path.display().to_string(), e))?;
        }
        tokio::fs::create_dir(&path).await?;
        Ok(path)
    }

    /// Remove a workspace. Removing a directory that is already gone is a no-op.
    pub async fn cleanup(&self, path: &Path) -> Result<(), WorkspaceError> {
        remove_dir_if_exists(path).await?;
        Ok(())
    }
}

/// Derive the workspace name of a repository: the last path segment of its
/// URL, without trailing slashes and `.git` suffix.
pub fn repo_name(url: &str) -> Result<&str, WorkspaceError> {
    let trimmed = url.trim().trim_end_matches('/');
    // also covers scp-like urls such as `git@github.com:owner/repo.git`
    let last = trimmed.rsplit(|c| c == '/' || c == ':').next().unwrap_or("");
    let name = last.strip_suffix(".git").unwrap_or(last);

    if name.is_empty() || name == "." || name.contains('\\') {
        return Err(WorkspaceError::InvalidName(url.to_owned()));
    }
    enforce_child_path(Path::new(name)).map_err(|_| WorkspaceError::InvalidName(url.to_owned()))?;
    Ok(name)
}

async fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            tracing::error!("{:?}: {}", path, e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_env_log::test;

    #[test]
    fn test_repo_name() {
        assert_eq!(
            repo_name("https://github.com/CS-intro-with-Python/midterm-StandartIvard").unwrap(),
            "midterm-StandartIvard"
        );
        assert_eq!(repo_name("https://github.com/a/b.git").unwrap(), "b");
        assert_eq!(repo_name("https://github.com/a/b/").unwrap(), "b");
        assert_eq!(repo_name("git@github.com:a/b.git").unwrap(), "b");
        // only the suffix is stripped, not any trailing `g`, `i` or `t`
        assert_eq!(repo_name("https://github.com/a/project-git").unwrap(), "project-git");
    }

    #[test]
    fn test_repo_name_invalid() {
        repo_name("").unwrap_err();
        repo_name("https://github.com/a/..").unwrap_err();
        repo_name("https://github.com/a/.git").unwrap_err();
        repo_name("https://github.com/a/.").unwrap_err();
    }

    #[test(tokio::test)]
    async fn test_prepare_clears_existing() {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(dir.path()).unwrap();

        let path = ws.prepare("https://example.com/x/repo.git").await.unwrap();
        assert_eq!(path, dir.path().join("repo"));
        tokio::fs::write(path.join("leftover"), b"old").await.unwrap();

        let again = ws.prepare("https://example.com/y/repo").await.unwrap();
        assert_eq!(again, path);
        assert!(tokio::fs::metadata(path.join("leftover")).await.is_err());
    }

    #[test(tokio::test)]
    async fn test_cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(dir.path()).unwrap();
        let path = ws.prepare("https://example.com/x/repo").await.unwrap();
        tokio::fs::create_dir_all(path.join("a/b")).await.unwrap();
        tokio::fs::write(path.join("a/b/c"), b"c").await.unwrap();

        ws.cleanup(&path).await.unwrap();
        assert!(tokio::fs::metadata(&path).await.is_err());
        ws.cleanup(&path).await.unwrap();
    }

    #[test(tokio::test)]
    async fn test_child_roots_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let ws = WorkspaceManager::new(dir.path()).unwrap();
        let a = ws.child("0").prepare("https://a.com/x/repo").await.unwrap();
        let b = ws.child("1").prepare("https://b.com/y/repo").await.unwrap();
        assert_ne!(a, b);
        assert!(tokio::fs::metadata(&a).await.unwrap().is_dir());
        assert!(tokio::fs::metadata(&b).await.unwrap().is_dir());
    }
}
