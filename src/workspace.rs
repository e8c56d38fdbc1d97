//! Workspace guard (§4.11): the boundary every file-path and working-
//! directory tool argument must resolve inside, after canonicalization and
//! symlink resolution. Enforces only the boundary — default-hidden paths
//! (`.git`, `node_modules`, `.env`, ...) are a non-core tooling concern per
//! the spec and are not filtered here.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A canonicalized workspace root plus the containment check every tool
/// path argument and command working directory must pass.
#[derive(Debug, Clone)]
pub struct WorkspaceGuard {
    root: PathBuf,
}

impl WorkspaceGuard {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|e| Error::config(format!("workspace root {}: {e}", root.display())))?;
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `candidate` (absolute, or relative to the workspace root)
    /// and check it falls within the workspace root after resolving
    /// symlinks. Tolerates a candidate that does not exist yet (so tools
    /// can validate a path they're about to create), by canonicalizing the
    /// nearest existing ancestor and re-joining the rest.
    pub fn resolve(&self, candidate: impl AsRef<Path>) -> Result<PathBuf> {
        let candidate = candidate.as_ref();
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let canonical = canonicalize_allow_missing_tail(&joined)
            .map_err(|_| Error::path_outside_workspace(candidate.display().to_string()))?;

        if canonical.starts_with(&self.root) {
            Ok(canonical)
        } else {
            Err(Error::path_outside_workspace(candidate.display().to_string()))
        }
    }
}

/// Canonicalize `path`, walking up to the nearest existing ancestor when
/// the full path doesn't exist yet and re-joining the non-existent tail.
fn canonicalize_allow_missing_tail(path: &Path) -> std::io::Result<PathBuf> {
    if let Ok(resolved) = path.canonicalize() {
        return Ok(resolved);
    }
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "path has no resolvable parent")
    })?;
    let tail = path.file_name();
    let canonical_parent = canonicalize_allow_missing_tail(parent)?;
    Ok(match tail {
        Some(name) => canonical_parent.join(name),
        None => canonical_parent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("agentcore-rt-workspace-test-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn accepts_paths_inside_the_root() {
        let root = temp_dir("inside");
        fs::write(root.join("a.txt"), b"hi").unwrap();
        let guard = WorkspaceGuard::new(&root).unwrap();
        let resolved = guard.resolve("a.txt").unwrap();
        assert!(resolved.starts_with(guard.root()));
    }

    #[test]
    fn rejects_paths_outside_the_root() {
        let root = temp_dir("outside-root");
        let guard = WorkspaceGuard::new(&root).unwrap();
        let err = guard.resolve("../../etc/passwd").unwrap_err();
        assert!(matches!(err, Error::PathOutsideWorkspace(_)));
    }

    #[test]
    fn allows_a_not_yet_created_file_inside_the_root() {
        let root = temp_dir("not-yet-created");
        let guard = WorkspaceGuard::new(&root).unwrap();
        let resolved = guard.resolve("new_dir/new_file.txt").unwrap();
        assert!(resolved.starts_with(guard.root()));
    }

    #[test]
    fn rejects_a_symlink_that_escapes_the_root() {
        let root = temp_dir("symlink-escape");
        let outside = temp_dir("symlink-escape-target");
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&outside, root.join("escape")).unwrap();
            let guard = WorkspaceGuard::new(&root).unwrap();
            let err = guard.resolve("escape").unwrap_err();
            assert!(matches!(err, Error::PathOutsideWorkspace(_)));
        }
    }
}
