//! Revert engine
//!
//! Reconstructs the filesystem state captured at a checkpoint (or at
//! session start) from the `old_content` snapshots in the change log, then
//! truncates the log and checkpoint list to match.
//!
//! The log is partitioned at the target timestamp. For each file touched
//! after the target, only its *earliest* post-target change matters: for a
//! linear per-file history that record's `old_content` (or, for `created`,
//! the absence it implies) is exactly the target-time state, and every
//! later record is an overwrite of it. Rename records restore to their old
//! path. Per-file failures are counted and never abort the batch.

use crate::cache::CacheEntry;
use crate::monitor::MonitorInner;
use crate::types::{Change, ChangeKind, RevertResult};
use crate::utils;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Disk outcome of one per-file restore action
enum Applied {
    /// Content was written to this root-relative path
    Written(String, Vec<u8>),
    /// The file at this root-relative path was removed
    Removed(String),
}

/// Revert to the state captured at `checkpoints[index - 1]` (1-based).
///
/// Returns `None` for an out-of-range index, for the final checkpoint
/// (nothing after it to revert), or when no changes follow the target.
pub(crate) fn revert_to_checkpoint(
    inner: &MonitorInner,
    root: &Path,
    index: usize,
) -> Option<RevertResult> {
    let mut state = inner.state.lock();
    let checkpoint_count = state.checkpoints.len();
    if index < 1 || index > checkpoint_count {
        debug!("Revert index {} out of range (1..={})", index, checkpoint_count);
        return None;
    }
    if index == checkpoint_count {
        debug!("Revert to the final checkpoint is a no-op");
        return None;
    }
    let target = state.checkpoints[index - 1].timestamp;
    apply_revert(root, &mut state, target, index, false)
}

/// Revert every recorded change, restoring the pre-session state; the log
/// and checkpoint list end up empty.
pub(crate) fn revert_to_original(inner: &MonitorInner, root: &Path) -> Option<RevertResult> {
    let mut state = inner.state.lock();
    apply_revert(root, &mut state, 0, 0, true)
}

fn apply_revert(
    root: &Path,
    state: &mut crate::monitor::MonitorState,
    target: u64,
    keep_checkpoints: usize,
    is_full_revert: bool,
) -> Option<RevertResult> {
    let split = state.log.partition_point(|c| c.timestamp <= target);
    if split == state.log.len() {
        debug!("No changes after target; revert is a no-op");
        return None;
    }
    let revert: Vec<Change> = state.log.split_off(split);
    info!(
        "Reverting {} changes (target {} ns, full: {})",
        revert.len(),
        target,
        is_full_revert
    );

    // Earliest post-target change per path, in log order, plus the number
    // of records each path accounts for.
    let mut order: Vec<&Change> = Vec::new();
    let mut records_per_path: std::collections::HashMap<&str, usize> =
        std::collections::HashMap::new();
    for change in &revert {
        let count = records_per_path.entry(change.path.as_str()).or_insert(0);
        if *count == 0 {
            order.push(change);
        }
        *count += 1;
    }

    let mut reverted_count = 0;
    let mut error_count = 0;
    let mut applied = Vec::new();
    let mut deleted_dirs = Vec::new();

    for first in order {
        match restore_file(root, first) {
            Ok(outcomes) => {
                reverted_count += records_per_path[first.path.as_str()];
                for outcome in &outcomes {
                    if let Applied::Removed(rel) = outcome {
                        deleted_dirs.push(utils::absolute_path(root, rel));
                    }
                }
                applied.extend(outcomes);
            }
            Err(err) => {
                warn!("Failed to revert {}: {}", first.path, err);
                error_count += 1;
            }
        }
    }

    // Prune ancestor directories emptied by the deletions, deepest first.
    deleted_dirs.sort_by(|a, b| b.components().count().cmp(&a.components().count()));
    for path in deleted_dirs {
        if let Some(parent) = path.parent() {
            utils::remove_empty_ancestors(parent, root);
        }
    }

    state.checkpoints.truncate(keep_checkpoints);

    // Refresh the monitor's belief for every path the engine touched so
    // late-arriving notifications for our own writes diff as no-ops.
    let mut refreshed = Vec::new();
    for outcome in applied {
        match outcome {
            Applied::Written(rel, content) => {
                let (device, inode) = stat_device_inode(&utils::absolute_path(root, &rel));
                state.cache.set(
                    &rel,
                    CacheEntry {
                        content,
                        device,
                        inode,
                    },
                );
                refreshed.push(rel);
            }
            Applied::Removed(rel) => {
                state.cache.remove(&rel);
                refreshed.push(rel);
            }
        }
    }

    Some(RevertResult {
        new_changes: state.log.clone(),
        new_checkpoints: state.checkpoints.clone(),
        reverted_count,
        error_count,
        is_full_revert,
        refreshed,
    })
}

/// Apply the restore action implied by a file's earliest post-target
/// change. Returns the disk outcomes, one per touched path.
fn restore_file(root: &Path, first: &Change) -> std::io::Result<Vec<Applied>> {
    let mut outcomes = Vec::new();
    match first.kind {
        ChangeKind::Created => {
            let abs = utils::absolute_path(root, &first.path);
            match fs::remove_file(&abs) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
            outcomes.push(Applied::Removed(first.path.clone()));
        }
        ChangeKind::Modified | ChangeKind::Deleted => {
            let content = first.old_content.clone().unwrap_or_default();
            write_restored(root, &first.path, &content)?;
            outcomes.push(Applied::Written(first.path.clone(), content));
        }
        ChangeKind::Renamed => {
            let old_path = first
                .meta
                .old_path()
                .unwrap_or(first.path.as_str())
                .to_string();
            let content = first.old_content.clone().unwrap_or_default();
            write_restored(root, &old_path, &content)?;
            outcomes.push(Applied::Written(old_path.clone(), content));
            if old_path != first.path {
                let abs_new = utils::absolute_path(root, &first.path);
                match fs::remove_file(&abs_new) {
                    Ok(()) => outcomes.push(Applied::Removed(first.path.clone())),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err),
                }
            }
        }
    }
    Ok(outcomes)
}

fn write_restored(root: &Path, rel: &str, content: &[u8]) -> std::io::Result<()> {
    let abs = utils::absolute_path(root, rel);
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)?;
    }
    utils::atomic_write(&abs, content)
}

fn stat_device_inode(path: &Path) -> (u64, u64) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        fs::metadata(path).map(|m| (m.dev(), m.ino())).unwrap_or((0, 0))
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        (0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::IgnoreFilter;
    use crate::monitor::{Monitor, SubscriberSet};
    use crate::types::MonitorConfig;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn monitor() -> Monitor {
        Monitor::new(
            "revert-test".to_string(),
            MonitorConfig::default(),
            Arc::new(SubscriberSet::new()),
        )
    }

    fn process(m: &Monitor, root: &Path, rel: &str) {
        let filter = IgnoreFilter::allow_all();
        m.inner.process_path(root, &filter, &utils::absolute_path(root, rel));
    }

    #[test]
    fn test_revert_created_deletes_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();

        fs::write(root.join("new.txt"), "n").unwrap();
        process(&m, root, "new.txt");

        let result = revert_to_original(&m.inner, root).unwrap();
        assert!(!root.join("new.txt").exists());
        assert_eq!(result.reverted_count, 1);
        assert_eq!(result.error_count, 0);
        assert!(result.is_full_revert);
        assert!(result.new_changes.is_empty());
        assert!(result.new_checkpoints.is_empty());
        assert!(!m.inner.state.lock().cache.contains("new.txt"));
    }

    #[test]
    fn test_revert_uses_earliest_post_target_change() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();

        fs::write(root.join("f.txt"), "v1").unwrap();
        process(&m, root, "f.txt");
        m.create_checkpoint(Some("cp1".to_string()));

        // Two post-checkpoint edits; only the first one's old_content matters
        fs::write(root.join("f.txt"), "v2").unwrap();
        process(&m, root, "f.txt");
        fs::write(root.join("f.txt"), "v3").unwrap();
        process(&m, root, "f.txt");
        m.create_checkpoint(Some("cp2".to_string()));

        let result = revert_to_checkpoint(&m.inner, root, 1).unwrap();
        assert_eq!(fs::read(root.join("f.txt")).unwrap(), b"v1");
        assert_eq!(result.reverted_count, 2);
        assert_eq!(result.new_changes.len(), 1);
        assert_eq!(result.new_changes[0].kind, ChangeKind::Created);
        assert_eq!(result.new_checkpoints.len(), 1);
        assert_eq!(result.new_checkpoints[0].label.as_deref(), Some("cp1"));
        assert!(!result.is_full_revert);
    }

    #[test]
    fn test_revert_recreates_deleted_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();

        fs::write(root.join("gone.txt"), "precious").unwrap();
        process(&m, root, "gone.txt");
        m.create_checkpoint(None);
        fs::remove_file(root.join("gone.txt")).unwrap();
        process(&m, root, "gone.txt");

        let result = revert_to_checkpoint(&m.inner, root, 1).unwrap();
        assert_eq!(fs::read(root.join("gone.txt")).unwrap(), b"precious");
        assert_eq!(result.reverted_count, 1);
        // The restored file is back in the monitor's belief
        let mut state = m.inner.state.lock();
        assert_eq!(state.cache.get("gone.txt").unwrap().content, b"precious");
    }

    #[test]
    fn test_revert_rename_restores_old_path() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();

        fs::write(root.join("x.txt"), "X").unwrap();
        process(&m, root, "x.txt");
        m.create_checkpoint(None);
        fs::rename(root.join("x.txt"), root.join("y.txt")).unwrap();
        process(&m, root, "x.txt");
        process(&m, root, "y.txt");

        let result = revert_to_checkpoint(&m.inner, root, 1).unwrap();
        assert_eq!(fs::read(root.join("x.txt")).unwrap(), b"X");
        assert!(!root.join("y.txt").exists());
        assert_eq!(result.reverted_count, 1);

        let mut state = m.inner.state.lock();
        assert_eq!(state.cache.get("x.txt").unwrap().content, b"X");
        assert!(!state.cache.contains("y.txt"));
    }

    #[test]
    fn test_revert_cleans_emptied_directories() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();

        fs::create_dir_all(root.join("deep/nest")).unwrap();
        fs::write(root.join("deep/nest/file.txt"), "d").unwrap();
        process(&m, root, "deep/nest/file.txt");

        revert_to_original(&m.inner, root).unwrap();
        assert!(!root.join("deep").exists());
    }

    #[test]
    fn test_revert_to_final_checkpoint_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();

        fs::write(root.join("a.txt"), "a").unwrap();
        process(&m, root, "a.txt");
        m.create_checkpoint(None);

        assert!(revert_to_checkpoint(&m.inner, root, 1).is_none());
        assert!(revert_to_checkpoint(&m.inner, root, 0).is_none());
        assert!(revert_to_checkpoint(&m.inner, root, 2).is_none());
        // Nothing was rolled back
        assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"a");
        assert_eq!(m.all_changes().len(), 1);
    }

    #[test]
    fn test_revert_empty_log_returns_none() {
        let temp_dir = TempDir::new().unwrap();
        let m = monitor();
        assert!(revert_to_original(&m.inner, temp_dir.path()).is_none());
    }

    #[test]
    fn test_failures_do_not_abort_batch() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();

        fs::write(root.join("ok.txt"), "ok-v1").unwrap();
        process(&m, root, "ok.txt");
        fs::write(root.join("victim.txt"), "v").unwrap();
        process(&m, root, "victim.txt");
        m.create_checkpoint(None);
        fs::write(root.join("ok.txt"), "ok-v2").unwrap();
        process(&m, root, "ok.txt");
        fs::remove_file(root.join("victim.txt")).unwrap();
        process(&m, root, "victim.txt");

        // Sabotage the victim's restore by occupying its path with a
        // directory the engine cannot atomically replace.
        fs::create_dir_all(root.join("victim.txt")).unwrap();

        let result = revert_to_checkpoint(&m.inner, root, 1).unwrap();
        assert_eq!(fs::read(root.join("ok.txt")).unwrap(), b"ok-v1");
        assert_eq!(result.error_count, 1);
        assert_eq!(result.reverted_count, 1);
    }
}
