//! Physical save/load of the counter file.
//!
//! Save: write a sibling temp file under an exclusive advisory lock, fsync,
//! set permissions, rename over the target, fsync the parent directory.
//! Readers only ever see the old file or the new one.

use crate::core::{CounterError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ============================================================================
// Advisory lock guard
// ============================================================================

/// Advisory lock held on an open file; released on drop.
pub struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    pub fn exclusive(file: &'a File) -> Result<Self> {
        FileExt::lock_exclusive(file)
            .map_err(|e| CounterError::Lock(format!("Failed to acquire write lock: {}", e)))?;
        Ok(Self { file })
    }

    pub fn shared(file: &'a File) -> Result<Self> {
        FileExt::lock_shared(file)
            .map_err(|e| CounterError::Lock(format!("Failed to acquire read lock: {}", e)))?;
        Ok(Self { file })
    }

    /// Non-blocking exclusive lock; `None` if another handle holds a lock.
    pub fn try_exclusive(file: &'a File) -> Option<Self> {
        FileExt::try_lock_exclusive(file).ok().map(|_| Self { file })
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

// ============================================================================
// Temp file naming
// ============================================================================

fn split_target(path: &Path) -> Result<(PathBuf, String)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CounterError::InvalidConfig(format!("Invalid counter file path '{}'", path.display())))?
        .to_string();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name))
}

fn temp_prefix(name: &str) -> String {
    format!(".{}.", name)
}

const TEMP_SUFFIX: &str = ".tmp";

/// Upper bound on a counter file; larger files are not read at all.
pub const MAX_RECORD_SIZE: u64 = 64 * 1024;

// ============================================================================
// Save
// ============================================================================

/// Atomically replaces `path` with `bytes`.
///
/// On any failure the temp file is removed and the previous content of `path`
/// is left untouched.
pub fn save(path: &Path, bytes: &[u8], permissions: u32) -> Result<()> {
    let (dir, name) = split_target(path)?;

    // Created with O_EXCL under a random name; removed on drop until persisted.
    let temp = tempfile::Builder::new()
        .prefix(&temp_prefix(&name))
        .suffix(TEMP_SUFFIX)
        .tempfile_in(&dir)?;

    {
        let file = temp.as_file();
        let _lock = FileLock::exclusive(file)?;
        let mut writer = file;
        writer.write_all(bytes)?;
        file.sync_all()?;
    }

    // Closes the descriptor; the path is still cleaned up on drop.
    let temp_path = temp.into_temp_path();
    set_permissions(&temp_path, permissions)?;
    temp_path.persist(path).map_err(|e| CounterError::Io(e.error))?;

    sync_parent_dir(&dir)?;
    Ok(())
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Makes the rename itself durable.
#[cfg(unix)]
fn sync_parent_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

// ============================================================================
// Load
// ============================================================================

/// Reads the raw bytes of `path` under a shared lock.
///
/// Missing, empty and oversized (> `MAX_RECORD_SIZE`) files are `None`.
pub fn load(path: &Path) -> Result<Option<Vec<u8>>> {
    let file = match OpenOptions::new().read(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let _lock = FileLock::shared(&file)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(None);
    }
    if len > MAX_RECORD_SIZE {
        warn!(path = %path.display(), size = len, max = MAX_RECORD_SIZE, "Counter file exceeds size limit, ignoring");
        return Ok(None);
    }

    // The file may still grow between stat and read.
    let mut data = Vec::with_capacity(len as usize);
    (&file).take(MAX_RECORD_SIZE + 1).read_to_end(&mut data)?;
    if data.len() as u64 > MAX_RECORD_SIZE {
        warn!(path = %path.display(), max = MAX_RECORD_SIZE, "Counter file exceeds size limit, ignoring");
        return Ok(None);
    }
    Ok(Some(data))
}

// ============================================================================
// Stale temp cleanup
// ============================================================================

/// Removes temp files left behind by writers that died before renaming.
///
/// A temp file whose exclusive lock cannot be taken belongs to a live writer
/// and is skipped. Returns the number of files removed.
pub fn remove_stale_temps(path: &Path) -> Result<usize> {
    let (dir, name) = split_target(path)?;
    let prefix = temp_prefix(&name);

    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if !file_name.starts_with(&prefix) || !file_name.ends_with(TEMP_SUFFIX) {
            continue;
        }

        let candidate = entry.path();
        let Ok(file) = OpenOptions::new().read(true).write(true).open(&candidate) else {
            continue;
        };
        let Some(lock) = FileLock::try_exclusive(&file) else {
            debug!(path = %candidate.display(), "Temp file is locked by a live writer, skipping");
            continue;
        };
        match fs::remove_file(&candidate) {
            Ok(()) => removed += 1,
            Err(err) => warn!(path = %candidate.display(), error = %err, "Failed to remove stale temp file"),
        }
        drop(lock);
    }
    Ok(removed)
}
