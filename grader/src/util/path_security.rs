//! Helper functions to disallow absolute paths or relative paths that goes into
//! parent paths.

use err_derive::Error;
use std::path::{Component, Path};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathSecurityError {
    #[error(display = "Path {} is an absolute path, which is not allowed", _0)]
    Absolute(String),

    #[error(display = "Path {} navigates into its parents, which is not allowed", _0)]
    EscapesParent(String),
}

/// Checks if a path is a relative path that does not navigate to its parent.
/// Returns `Err` if it's not.
pub fn enforce_child_path(path: &Path) -> Result<(), PathSecurityError> {
    let mut depth = 0;
    for part in path.components() {
        match part {
            Component::Prefix(_) | Component::RootDir => {
                return Err(PathSecurityError::Absolute(
                    path.to_string_lossy().into_owned(),
                ));
            }
            Component::CurDir => {}
            Component::ParentDir => depth -= 1,
            Component::Normal(_) => depth += 1,
        }
        if depth < 0 {
            return Err(PathSecurityError::EscapesParent(
                path.to_string_lossy().into_owned(),
            ));
        }
    }
    Ok(())
}
