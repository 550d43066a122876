//! Per-job scratch directories.
//!
//! Every temporary file a job produces lives under `<temp_root>/<job_id>`.
//! A [`Workspace`] removes its directory exactly once: through
//! [`Workspace::release`] on the normal path, or from `Drop` when the owning
//! task is cancelled or panics.

use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::WorkspaceError;
use crate::sanitize::safe_file_name;

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh directory for `job_id`, wiping leftovers from an
    /// earlier attempt that crashed before cleanup.
    pub async fn acquire(&self, job_id: &str) -> Result<Workspace, WorkspaceError> {
        validate_job_id(job_id)?;
        let path = self.root.join(job_id);

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => warn!("Removed stale workspace for job {}", job_id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(WorkspaceError::RemoveDirectory {
                    path: path.clone(),
                    source: e,
                })
            }
        }

        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| WorkspaceError::CreateDirectory {
                path: path.clone(),
                source: e,
            })?;

        debug!("Acquired workspace {}", path.display());

        Ok(Workspace {
            job_id: job_id.to_string(),
            path,
            released: false,
        })
    }

    /// Releases `workspace`. Equivalent to [`Workspace::release`].
    pub async fn release(&self, workspace: Workspace) -> Result<(), WorkspaceError> {
        workspace.release().await
    }
}

/// Job ids become directory names, so they must be one plain path component.
fn validate_job_id(job_id: &str) -> Result<(), WorkspaceError> {
    let valid = !job_id.is_empty()
        && job_id != "."
        && job_id != ".."
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(WorkspaceError::InvalidJobId(job_id.to_string()))
    }
}

#[derive(Debug)]
pub struct Workspace {
    job_id: String,
    path: PathBuf,
    released: bool,
}

impl Workspace {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path for `name` inside the workspace. `name` is reduced to a single
    /// safe component first.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.path.join(safe_file_name(name, "input"))
    }

    pub async fn write_file(&self, name: &str, contents: &[u8]) -> Result<PathBuf, WorkspaceError> {
        let path = self.file_path(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| WorkspaceError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        Ok(path)
    }

    /// Recursively deletes the workspace directory.
    ///
    /// A directory that is already gone counts as released.
    pub async fn release(mut self) -> Result<(), WorkspaceError> {
        let result = match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkspaceError::RemoveDirectory {
                path: self.path.clone(),
                source: e,
            }),
        };
        self.released = true;
        debug!("Released workspace for job {}", self.job_id);
        result
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Released workspace for job {} on drop", self.job_id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove workspace {} on drop: {}",
                self.path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_creates_job_directory() {
        let temp = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp.path());

        let ws = manager.acquire("job-123").await.unwrap();
        assert_eq!(ws.path(), temp.path().join("job-123"));
        assert!(ws.path().is_dir());
        assert_eq!(ws.job_id(), "job-123");

        ws.release().await.unwrap();
        assert!(!temp.path().join("job-123").exists());
    }

    #[tokio::test]
    async fn test_acquire_wipes_stale_directory() {
        let temp = TempDir::new().unwrap();
        let stale = temp.path().join("job-1");
        std::fs::create_dir_all(stale.join("nested")).unwrap();
        std::fs::write(stale.join("nested/old_audio_0.mp3"), b"old").unwrap();

        let manager = WorkspaceManager::new(temp.path());
        let ws = manager.acquire("job-1").await.unwrap();

        assert!(ws.path().is_dir());
        assert_eq!(std::fs::read_dir(ws.path()).unwrap().count(), 0);
        ws.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_unsafe_job_ids() {
        let temp = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp.path());

        for id in ["", ".", "..", "../escape", "a/b", "a\\b", "job 1"] {
            let result = manager.acquire(id).await;
            assert!(
                matches!(result, Err(WorkspaceError::InvalidJobId(_))),
                "id {:?} should be rejected",
                id
            );
        }
    }

    #[tokio::test]
    async fn test_drop_releases_directory() {
        let temp = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp.path());

        let ws = manager.acquire("job-drop").await.unwrap();
        ws.write_file("talk.mp3", b"data").await.unwrap();
        let path = ws.path().to_path_buf();
        drop(ws);

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_release_tolerates_missing_directory() {
        let temp = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp.path());

        let ws = manager.acquire("job-gone").await.unwrap();
        std::fs::remove_dir_all(ws.path()).unwrap();
        manager.release(ws).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_file_sanitizes_name() {
        let temp = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp.path());
        let ws = manager.acquire("job-w").await.unwrap();

        let path = ws.write_file("../../outside.mp3", b"abc").await.unwrap();
        assert_eq!(path, ws.path().join("outside.mp3"));
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        ws.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_root_created_on_demand() {
        let temp = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(temp.path().join("not/yet/there"));
        let ws = manager.acquire("job-x").await.unwrap();
        assert!(ws.path().is_dir());
    }
}
