//! Write-to-temp-then-rename atomicity for every artifact the scheduler
//! persists, so a reader never observes a half-written file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::{Result, StoreError};

/// Writes `bytes` to `path` atomically: the content lands in a sibling temp
/// file (named with this process's pid so concurrent writers in different
/// processes never collide), is fsynced, then renamed into place. `rename`
/// within the same directory is atomic on every platform this engine targets.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir.display().to_string(), e))?;

    let tmp_path = dir.join(format!(
        "{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("artifact"),
        std::process::id()
    ));

    {
        let mut file =
            File::create(&tmp_path).map_err(|e| StoreError::io(tmp_path.display().to_string(), e))?;
        file.write_all(bytes)
            .map_err(|e| StoreError::io(tmp_path.display().to_string(), e))?;
        file.sync_all()
            .map_err(|e| StoreError::io(tmp_path.display().to_string(), e))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| StoreError::io(path.display().to_string(), e))?;
    Ok(())
}

/// Appends `line` (without its own trailing newline) to `path`, creating the
/// file if absent. Used for `progress.ndjson`; callers serialize writes with
/// their own mutex so concurrent appends never interleave mid-line.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir.display().to_string(), e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path.display().to_string(), e))?;
    writeln!(file, "{line}").map_err(|e| StoreError::io(path.display().to_string(), e))?;
    Ok(())
}

/// Creates `path` with `bytes` only if it does not already exist. Returns
/// `Ok(true)` if this call created the file, `Ok(false)` if it already
/// existed (treated as a success no-op, never an error — this is how
/// `final.json`'s exactly-once guarantee is enforced).
pub fn create_new(path: &Path, bytes: &[u8]) -> Result<bool> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir.display().to_string(), e))?;
    }
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(bytes)
                .map_err(|e| StoreError::io(path.display().to_string(), e))?;
            file.sync_all()
                .map_err(|e| StoreError::io(path.display().to_string(), e))?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(StoreError::io(path.display().to_string(), e)),
    }
}
