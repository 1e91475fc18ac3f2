use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use super::error::{ProcessorError, ProcessorResult};

/// Per-request temporary directory holding segments, manifest and output.
///
/// Removal happens on [`ScratchArea::close`] or, if the pipeline is dropped
/// before reaching it, when the area itself is dropped.
#[derive(Debug)]
pub struct ScratchArea {
    dir: TempDir,
}

impl ScratchArea {
    pub fn create(parent: Option<&Path>) -> ProcessorResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("segmerge-");
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent).map_err(|source| ProcessorError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .map_err(|source| ProcessorError::Io {
            path: parent
                .map(Path::to_path_buf)
                .unwrap_or_else(std::env::temp_dir),
            source,
        })?;
        debug!(path = %dir.path().display(), "scratch area created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join<P: AsRef<Path>>(&self, name: P) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(err) = self.dir.close() {
            warn!(path = %path.display(), error = %err, "failed to clean scratch area");
        } else {
            debug!(path = %path.display(), "scratch area removed");
        }
    }
}
