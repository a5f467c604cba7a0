//! Per-request scratch directories.
//!
//! Every conversion gets its own `<root>/<prefix><random>/` with an `input/`
//! and an `output/` subdirectory. The [`Workspace`] handle owns that tree and
//! removes it on [`Workspace::release`] or, failing that, on drop.

use crate::error::ConvertError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    prefix: String,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    pub fn acquire(&self) -> Result<Workspace, ConvertError> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            ConvertError::internal(format!("create workspace root {}", self.root.display()), e)
        })?;

        let temp = tempfile::Builder::new()
            .prefix(&self.prefix)
            .tempdir_in(&self.root)
            .map_err(|e| {
                ConvertError::internal(format!("create workspace in {}", self.root.display()), e)
            })?;

        let dir = temp.path().to_path_buf();
        let workspace = Workspace {
            input_dir: dir.join("input"),
            output_dir: dir.join("output"),
            dir,
            temp: Some(temp),
        };
        for sub in [&workspace.input_dir, &workspace.output_dir] {
            std::fs::create_dir(sub).map_err(|e| {
                ConvertError::internal(format!("create workspace subdir {}", sub.display()), e)
            })?;
        }

        debug!(dir = %workspace.dir.display(), "workspace acquired");
        Ok(workspace)
    }
}

/// Dropping the handle removes the tree through [`TempDir`].
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    input_dir: PathBuf,
    output_dir: PathBuf,
    temp: Option<TempDir>,
}

impl Workspace {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Removes the whole tree. Missing paths are fine and repeat calls are no-ops;
    /// other removal errors are logged, never returned.
    pub fn release(&mut self) {
        let Some(temp) = self.temp.take() else {
            return;
        };
        match temp.close() {
            Ok(()) => debug!(dir = %self.dir.display(), "workspace released"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(
                dir = %self.dir.display(),
                error = %err,
                "failed to remove workspace"
            ),
        }
    }
}
