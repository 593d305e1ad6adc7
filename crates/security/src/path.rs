//! Path validation: containment of file access to a workspace directory.
//!
//! Every file a sandboxed tool touches must resolve, after symlinks and `..`
//! components, to a location under the owning workspace root.

use std::path::{Component, Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Filepath is outside the workspace: '{path}'")]
    OutsideWorkspace { path: String },

    #[error("Failed to canonicalize path '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

/// Resolve `path` against `root` and ensure the result stays inside `root`.
///
/// Relative paths are joined to the root; absolute paths are taken as-is.
/// Existing paths are canonicalized (following symlinks). For paths that do
/// not exist yet, the nearest existing ancestor is canonicalized and the
/// remaining components are appended lexically.
///
/// Returns the resolved path on success.
pub fn validate_in_workspace(path: impl AsRef<Path>, root: &Path) -> Result<PathBuf, PathValidationError> {
    let raw = path.as_ref();
    let display = raw.display().to_string();

    let root = root
        .canonicalize()
        .map_err(|e| PathValidationError::CanonicalizeFailed {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;

    let joined = if raw.is_absolute() { raw.to_path_buf() } else { root.join(raw) };
    let resolved = resolve(&joined).map_err(|reason| PathValidationError::CanonicalizeFailed {
        path: display.clone(),
        reason,
    })?;

    if resolved == root || resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(PathValidationError::OutsideWorkspace { path: display })
    }
}

/// Canonicalize the longest existing prefix, then normalize the rest.
fn resolve(path: &Path) -> Result<PathBuf, String> {
    if path.exists() {
        return path.canonicalize().map_err(|e| e.to_string());
    }

    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            // Ran out of components (e.g. trailing `..`); normalize lexically.
            _ => return Ok(normalize(path)),
        }
    }

    let mut resolved = existing.canonicalize().map_err(|e| e.to_string())?;
    for part in tail.into_iter().rev() {
        resolved.push(part);
    }
    Ok(normalize(&resolved))
}

/// Lexically collapse `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
