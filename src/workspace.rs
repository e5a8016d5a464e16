// src/workspace.rs
// Per-session workspace directories and sandboxed file access.
//
// All file I/O performed by tools goes through a Workspace handle. Paths are
// resolved against the session's root and rejected if they escape it after
// normalization - `..` traversal, absolute paths, and symlinked ancestors
// pointing outside the root all fail with PATH_ESCAPE.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::{KitError, Result, codes};
use crate::utils::short_id;

/// Owns the workspace root directory and hands out per-session workspaces.
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a session's workspace lives at (whether or not it exists).
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    /// Create (if needed) and return the workspace for a session.
    pub fn ensure(&self, session_id: &str) -> Result<Workspace> {
        let dir = self.path_for(session_id);
        std::fs::create_dir_all(&dir)
            .map_err(|e| KitError::system(format!("failed to create workspace: {e}")).caused_by(e))?;
        Ok(Workspace { root: dir })
    }

    /// Open an existing session workspace without creating it.
    pub fn open(&self, session_id: &str) -> Result<Workspace> {
        let dir = self.path_for(session_id);
        if !dir.is_dir() {
            return Err(KitError::system(format!(
                "workspace missing for session '{session_id}'"
            )));
        }
        Ok(Workspace { root: dir })
    }

    /// Remove a session's workspace with a few retries.
    ///
    /// Deletion failures are reported but callers treat them as best-effort:
    /// they must not block session deletion.
    pub async fn remove(&self, session_id: &str) -> Result<()> {
        let dir = self.path_for(session_id);
        if !dir.exists() {
            return Ok(());
        }
        let mut last_err: Option<std::io::Error> = None;
        for attempt in 0..3 {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        "workspace removal attempt {} for '{}' failed: {}",
                        attempt + 1,
                        session_id,
                        e
                    );
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(100 * (attempt + 1))).await;
                }
            }
        }
        let err = last_err.map(KitError::from).unwrap_or_else(|| {
            KitError::system("workspace removal failed")
        });
        Err(err.with_context("session_id", session_id))
    }
}

/// Sandboxed handle to one session's directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path, rejecting any escape.
    ///
    /// Normalization is lexical (no filesystem access) for `..`/absolute
    /// rejection; symlink escapes are caught by canonicalizing the nearest
    /// existing ancestor and requiring it to stay under the root.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let relative = relative.as_ref();

        let escape = |detail: &str| {
            KitError::new(
                codes::PATH_ESCAPE,
                crate::error::ErrorCategory::Security,
                crate::error::Severity::High,
                format!("path '{}' escapes the workspace: {detail}", relative.display()),
            )
            .with_context("workspace", self.root.to_string_lossy())
        };

        if relative.is_absolute() {
            return Err(escape("absolute paths are not allowed"));
        }

        let mut normalized = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(escape("'..' traversal above the root"));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(escape("absolute component"));
                }
            }
        }

        let full = self.root.join(&normalized);

        // Symlink check: canonicalize the deepest existing ancestor and make
        // sure it is still inside the (canonicalized) root.
        let canonical_root = self
            .root
            .canonicalize()
            .map_err(|e| KitError::system(format!("workspace root missing: {e}")).caused_by(e))?;
        let mut probe = full.clone();
        let existing = loop {
            if probe.exists() {
                break probe;
            }
            match probe.parent() {
                Some(parent) => probe = parent.to_path_buf(),
                None => break self.root.clone(),
            }
        };
        let canonical_ancestor = existing
            .canonicalize()
            .map_err(|e| KitError::system(format!("canonicalize failed: {e}")).caused_by(e))?;
        if !canonical_ancestor.starts_with(&canonical_root) {
            return Err(escape("symlink points outside the workspace"));
        }

        Ok(full)
    }

    pub fn exists(&self, relative: impl AsRef<Path>) -> bool {
        self.resolve(relative).map(|p| p.exists()).unwrap_or(false)
    }

    pub fn read_to_string(&self, relative: impl AsRef<Path>) -> Result<String> {
        let path = self.resolve(relative)?;
        std::fs::read_to_string(&path)
            .map_err(|e| KitError::system(format!("read failed for {}: {e}", path.display())).caused_by(e))
    }

    /// Write a file atomically: stage to a sibling temp file, then rename.
    /// Readers never observe a partially written artifact; this is what the
    /// fix loop relies on when it rewrites a Dockerfile under retry.
    pub fn write_atomic(&self, relative: impl AsRef<Path>, contents: &str) -> Result<PathBuf> {
        let path = self.resolve(&relative)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let staged = path.with_extension(format!("tmp-{}", short_id()));
        std::fs::write(&staged, contents)?;
        std::fs::rename(&staged, &path).map_err(|e| {
            let _ = std::fs::remove_file(&staged);
            KitError::system(format!("rename failed for {}: {e}", path.display())).caused_by(e)
        })?;
        Ok(path)
    }

    /// Create a subdirectory inside the workspace.
    pub fn create_dir_all(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// List files directly under a workspace subdirectory.
    pub fn list_files(&self, relative: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = self.resolve(relative)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = WorkspaceManager::new(dir.path().to_path_buf());
        let ws = manager.ensure("s-1").expect("ensure");
        (dir, ws)
    }

    #[test]
    fn resolve_allows_normal_relative_paths() {
        let (_dir, ws) = temp_workspace();
        let path = ws.resolve("manifests/deploy.yaml").expect("resolve");
        assert!(path.starts_with(ws.root()));
    }

    #[test]
    fn resolve_rejects_parent_traversal() {
        let (_dir, ws) = temp_workspace();
        let err = ws.resolve("../other/Dockerfile").expect_err("must reject");
        assert_eq!(err.code, codes::PATH_ESCAPE);
        // Interior `..` that stays inside is fine
        assert!(ws.resolve("a/../Dockerfile").is_ok());
    }

    #[test]
    fn resolve_rejects_absolute_paths() {
        let (_dir, ws) = temp_workspace();
        let err = ws.resolve("/etc/passwd").expect_err("must reject");
        assert_eq!(err.code, codes::PATH_ESCAPE);
    }

    #[cfg(unix)]
    #[test]
    fn resolve_rejects_symlink_escape() {
        let (dir, ws) = temp_workspace();
        let outside = dir.path().parent().map(Path::to_path_buf).unwrap_or_default();
        std::os::unix::fs::symlink(&outside, ws.root().join("leak")).expect("symlink");
        let err = ws.resolve("leak/secret.txt").expect_err("must reject");
        assert_eq!(err.code, codes::PATH_ESCAPE);
    }

    #[test]
    fn write_atomic_round_trip() {
        let (_dir, ws) = temp_workspace();
        ws.write_atomic("Dockerfile", "FROM node:20-alpine\n").expect("write");
        assert_eq!(ws.read_to_string("Dockerfile").expect("read"), "FROM node:20-alpine\n");
        // Overwrite leaves no stray temp files
        ws.write_atomic("Dockerfile", "FROM node:22-alpine\n").expect("rewrite");
        let names: Vec<_> = std::fs::read_dir(ws.root())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["Dockerfile".to_string()]);
    }

    #[tokio::test]
    async fn manager_remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = WorkspaceManager::new(dir.path().to_path_buf());
        manager.ensure("s-9").expect("ensure");
        manager.remove("s-9").await.expect("remove");
        assert!(!manager.path_for("s-9").exists());
        manager.remove("s-9").await.expect("second remove");
    }
}
