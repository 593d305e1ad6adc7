//! Per-agent workspaces.
//!
//! A workspace is a uniquely named directory created for one agent instance
//! and removed when that instance finishes. All file access goes through
//! [`validate_in_workspace`].

use lorekeep_core::error::WorkspaceError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::path::validate_in_workspace;

/// A file found in a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceFile {
    /// Path relative to the workspace root
    pub path: String,
    pub absolute_path: PathBuf,
    pub size_bytes: u64,
    pub mime_type: String,
}

#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    destroyed: bool,
}

impl Workspace {
    /// Create `{parent}/sandbox_{label}_{uuid8}`.
    pub fn create(parent: &Path, label: &str) -> Result<Self, WorkspaceError> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let label: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let root = parent.join(format!("sandbox_{label}_{}", &suffix[..8]));
        std::fs::create_dir_all(&root).map_err(|source| WorkspaceError::Create {
            path: root.display().to_string(),
            source,
        })?;
        info!(workspace = %root.display(), "Created workspace");
        Ok(Self { root, destroyed: false })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative (or absolute) path, enforcing containment.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf, WorkspaceError> {
        validate_in_workspace(path.as_ref(), &self.root)
            .map_err(|_| WorkspaceError::OutsideWorkspace(path.as_ref().display().to_string()))
    }

    /// Write bytes into the workspace, creating parent directories.
    pub fn stage_file(&self, name: &str, content: &[u8]) -> Result<PathBuf, WorkspaceError> {
        let target = self.resolve(name)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|source| io_err(parent, source))?;
        }
        std::fs::write(&target, content).map_err(|source| io_err(&target, source))?;
        debug!(file = %target.display(), bytes = content.len(), "Staged file");
        Ok(target)
    }

    pub fn read_bytes(&self, path: impl AsRef<Path>) -> Result<Vec<u8>, WorkspaceError> {
        let target = self.resolve(path)?;
        std::fs::read(&target).map_err(|source| io_err(&target, source))
    }

    /// Read a file as text (lossy), keeping at most `max_chars` characters.
    pub fn read_text(&self, path: impl AsRef<Path>, max_chars: usize) -> Result<String, WorkspaceError> {
        let bytes = self.read_bytes(path)?;
        Ok(String::from_utf8_lossy(&bytes).chars().take(max_chars).collect())
    }

    /// Every regular file under the root, sorted by relative path.
    pub fn list_files(&self) -> Vec<WorkspaceFile> {
        let mut files = Vec::new();
        collect_files(&self.root, &self.root, &mut files);
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    /// Remove the workspace directory.
    pub fn destroy(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => info!(workspace = %self.root.display(), "Removed workspace"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(workspace = %self.root.display(), error = %e, "Failed to remove workspace"),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.remove();
    }
}

fn io_err(path: &Path, source: std::io::Error) -> WorkspaceError {
    WorkspaceError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<WorkspaceFile>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        // symlink_metadata: do not follow links out of the workspace
        let Ok(meta) = entry.path().symlink_metadata() else {
            continue;
        };
        if meta.is_dir() {
            collect_files(root, &path, out);
        } else if meta.is_file() {
            let rel = path.strip_prefix(root).unwrap_or(&path).display().to_string();
            out.push(WorkspaceFile {
                mime_type: detect_mime(&path).to_string(),
                path: rel,
                absolute_path: path,
                size_bytes: meta.len(),
            });
        }
    }
}

/// Guess a MIME type from the file extension.
pub fn detect_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "doc" => "application/msword",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "csv" => "text/csv",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "eml" => "message/rfc822",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}
