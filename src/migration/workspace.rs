//! Per-job scratch directories.
//!
//! Each job gets `<root>/job-<id>/`, created exclusively before the fetch
//! stage. [`Workspace::destroy`] removes it on the normal exit paths and the
//! `Drop` impl removes it on any path that skipped `destroy` (early return,
//! panic, task abort).

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::WorkspaceError;

const JOB_DIR_PREFIX: &str = "job-";
const SOURCE_DIR: &str = "source";

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, job_id: Uuid) -> PathBuf {
        self.root.join(format!("{}{}", JOB_DIR_PREFIX, job_id))
    }

    /// Create the job's directory. Fails if it already exists so two jobs can
    /// never share a tree.
    pub fn allocate(&self, job_id: Uuid) -> Result<Workspace, WorkspaceError> {
        std::fs::create_dir_all(&self.root).map_err(|source| WorkspaceError::Io {
            path: self.root.clone(),
            source,
        })?;
        let root = self.path_for(job_id);
        match std::fs::create_dir(&root) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(WorkspaceError::AlreadyExists(root));
            }
            Err(source) => return Err(WorkspaceError::Io { path: root, source }),
        }
        debug!(job_id = %job_id, path = %root.display(), "workspace allocated");
        Ok(Workspace {
            root,
            removed: false,
        })
    }

    /// Remove `job-*` directories left behind by a previous process.
    /// Returns how many were removed.
    pub fn sweep_stale(&self) -> Result<usize, WorkspaceError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(WorkspaceError::Io {
                    path: self.root.clone(),
                    source,
                });
            }
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_job_dir = path.is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(JOB_DIR_PREFIX));
            if !is_job_dir {
                continue;
            }
            match std::fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale workspace"),
            }
        }
        Ok(removed)
    }
}

/// A job-exclusive directory tree.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    removed: bool,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the fetcher places the checkout.
    pub fn source_dir(&self) -> PathBuf {
        self.root.join(SOURCE_DIR)
    }

    /// Remove the tree. A tree that is already gone counts as removed.
    pub async fn destroy(mut self) -> Result<(), WorkspaceError> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(WorkspaceError::Io {
                    path: self.root.clone(),
                    source,
                });
            }
        }
        self.removed = true;
        debug!(path = %self.root.display(), "workspace removed");
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.root)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.root.display(), error = %e, "failed to remove workspace on drop");
        }
    }
}
