//! Utility functions for Watchpoint
//!
//! Common helpers used throughout the library: path manipulation between the
//! absolute reader/writer boundary and the root-relative form stored in the
//! change log, atomic file writing, and empty-directory cleanup after
//! reverts.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Convert an absolute path to the root-relative, forward-slash form used
/// throughout the change log and the content cache.
///
/// Tries a lexical strip first so symbolic links inside the root keep their
/// link path rather than being canonicalized to their target. Falls back to
/// canonicalizing both sides when the lexical strip fails (relative
/// components, differing normalization).
///
/// Returns `None` when `path` is not under `root`.
pub fn relative_slash_path(path: &Path, root: &Path) -> Option<String> {
    let relative = if let Ok(stripped) = path.strip_prefix(root) {
        stripped.to_path_buf()
    } else {
        let path_canon = path.canonicalize().ok()?;
        let root_canon = root.canonicalize().ok()?;
        path_canon.strip_prefix(&root_canon).ok()?.to_path_buf()
    };

    let mut out = String::new();
    for component in relative.components() {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Join a root-relative, forward-slash path back onto the watch root.
pub fn absolute_path(root: &Path, relative: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        out.push(segment);
    }
    out
}

/// Atomic file write (write to temp file then rename)
///
/// Writes to a sibling `.tmp` file and renames it into place so the target
/// is never observable in a partially written state.
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_extension("wp-tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Remove directory if empty
pub fn remove_dir_if_empty(path: &Path) -> std::io::Result<bool> {
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        trace!("Removed empty directory: {:?}", path);
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Remove now-empty ancestor directories of `start`, walking upward until
/// `root` (exclusive) or the first non-empty directory. Failures other than
/// emptiness are ignored; the caller has already applied its file actions.
pub fn remove_empty_ancestors(start: &Path, root: &Path) {
    let mut current = start.to_path_buf();
    while current != *root && current.starts_with(root) {
        match remove_dir_if_empty(&current) {
            Ok(true) => {}
            _ => break,
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
}
