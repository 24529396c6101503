//! Where finished documents go.

use crate::error::ChatError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Persists an exported document under a file name.
pub trait DocumentSink: Send + Sync {
    /// Store `bytes` as `file_name` and return where it ended up.
    fn save(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, ChatError>;
}

/// Writes documents into a directory, replacing any file of the same name.
///
/// The write goes to a temporary file in the target directory first and is
/// renamed into place, so a failed export never leaves a truncated file.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DocumentSink for DirectorySink {
    fn save(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, ChatError> {
        let path = self.dir.join(file_name);
        let write_err = |source| ChatError::ExportWriteFailed {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(write_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        tmp.write_all(bytes).map_err(write_err)?;
        tmp.flush().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }
}
