//! Backup-then-rewrite for system configuration files.
//!
//! The original file is renamed to a `.bak` sibling, the new content is
//! written to the original path with the original permissions, and any
//! failure moves the backup back so the file is never left half-written.

use crate::error::HookError;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Read a configuration file as a list of raw lines (terminators stripped).
///
/// Lines stay bytes: system files may carry comments in a legacy encoding,
/// and those must be written back untouched.
pub(crate) fn read_lines(path: &Path) -> Result<Vec<Vec<u8>>, HookError> {
    let content = fs::read(path).map_err(|e| HookError::io("reading", path, e))?;
    Ok(split_lines(&content))
}

fn split_lines(content: &[u8]) -> Vec<Vec<u8>> {
    let mut lines: Vec<Vec<u8>> = content
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line).to_vec())
        .collect();
    // A terminated last line (or an empty file) leaves an empty tail
    if content.is_empty() || content.ends_with(b"\n") {
        lines.pop();
    }
    lines
}

/// Render lines back to file content, one `\n` after each line.
pub(crate) fn render_lines(lines: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        out.extend_from_slice(line);
        out.push(b'\n');
    }
    out
}

/// Path of the backup kept next to `path`.
pub(crate) fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".bak");
    PathBuf::from(name)
}

/// Replace the content of `path` with `lines`.
pub(crate) fn rewrite_lines(path: &Path, lines: &[Vec<u8>]) -> Result<(), HookError> {
    rewrite_with(path, &render_lines(lines), write_synced)
}

/// Replace the content of `path`, using `write` to produce the new file.
///
/// On any failure after the backup was taken, the backup is moved back over
/// whatever `write` left behind.
pub(crate) fn rewrite_with<F>(path: &Path, content: &[u8], write: F) -> Result<(), HookError>
where
    F: FnOnce(&Path, &[u8]) -> io::Result<()>,
{
    let permissions = fs::metadata(path)
        .map_err(|e| HookError::io("inspecting", path, e))?
        .permissions();

    let backup = backup_path(path);
    fs::rename(path, &backup).map_err(|e| HookError::io("backing up", path, e))?;
    debug!(path = %path.display(), backup = %backup.display(), "Backed up config file");

    let result = write(path, content).and_then(|()| fs::set_permissions(path, permissions));
    if let Err(e) = result {
        restore_backup(&backup, path);
        return Err(HookError::io("writing", path, e));
    }

    Ok(())
}

fn restore_backup(backup: &Path, path: &Path) {
    if let Err(e) = fs::rename(backup, path) {
        error!(
            path = %path.display(),
            backup = %backup.display(),
            error = %e,
            "Failed to restore config backup, restore it manually"
        );
    }
}

fn write_synced(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content)?;
    file.sync_all()
}
