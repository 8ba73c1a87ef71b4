use crate::core::Result;
use crate::storage::durable;
use std::path::{Path, PathBuf};

/// Where the engine keeps its encoded record.
///
/// Implementations perform exactly one physical attempt per call; retries
/// belong to the engine.
pub trait RecordStore: Send + Sync {
    fn save(&self, bytes: &[u8]) -> Result<()>;

    /// `None` when nothing usable has been stored yet.
    fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Housekeeping before first use. Returns the number of leftovers removed.
    fn recover(&self) -> Result<usize> {
        Ok(0)
    }

    fn location(&self) -> String;
}

/// Local file target with atomic replace and advisory locking.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    permissions: u32,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(path: P, permissions: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            permissions,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for FileStore {
    fn save(&self, bytes: &[u8]) -> Result<()> {
        durable::save(&self.path, bytes, self.permissions)
    }

    fn load(&self) -> Result<Option<Vec<u8>>> {
        durable::load(&self.path)
    }

    fn recover(&self) -> Result<usize> {
        durable::remove_stale_temps(&self.path)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
