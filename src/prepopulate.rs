//! Cache prepopulation
//!
//! When a watch starts, the root is walked (depth- and count-bounded,
//! ignore-filtered) and every tracked regular file is read into the content
//! cache. Until this completes, a modification to a not-yet-cached file is
//! indistinguishable from a creation, so `on_ready` is the synchronization
//! point callers use before relying on diffs.
//!
//! The walk runs on its own thread and inserts entries one at a time under
//! the monitor's state lock; it never blocks the caller, and cancellation
//! (watch teardown) is checked between entries.

use crate::cache::CacheEntry;
use crate::filter::IgnoreFilter;
use crate::monitor::MonitorInner;
use crate::reader;
use crate::types::PrepopulateStats;
use crate::utils;
use ignore::WalkBuilder;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Walk `root` and populate the monitor's cache.
///
/// Bounded by `max_depth` directory descents and `max_prepopulate_files`
/// regular files; ignored directories are pruned before descent. Read
/// failures (oversize, binary, I/O) are counted and skipped; the walk
/// itself never fails.
pub(crate) fn run(
    inner: &MonitorInner,
    root: &Path,
    filter: &Arc<IgnoreFilter>,
    cancelled: &AtomicBool,
) -> PrepopulateStats {
    let start = Instant::now();
    let mut stats = PrepopulateStats::default();

    // The walker's own gitignore handling stays off; the session filter is
    // the single source of truth for what is tracked.
    let filter_root = root.to_path_buf();
    let entry_filter = Arc::clone(filter);
    let walker = WalkBuilder::new(root)
        .max_depth(Some(inner.config.max_depth))
        .follow_links(false)
        .hidden(false)
        .parents(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .filter_entry(move |entry| {
            let Some(rel) = utils::relative_slash_path(entry.path(), &filter_root) else {
                return true;
            };
            let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            if is_dir {
                !entry_filter.should_ignore_dir(&rel)
            } else {
                !entry_filter.should_ignore(&rel)
            }
        })
        .build();

    for entry in walker {
        if cancelled.load(Ordering::Acquire) {
            debug!("Prepopulation cancelled after {} files", stats.files_scanned);
            break;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                trace!("Walk error: {}", err);
                stats.errors += 1;
                continue;
            }
        };
        if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
            stats.directories_scanned += 1;
            continue;
        }
        let path = entry.path();
        let Some(rel) = utils::relative_slash_path(path, root) else {
            continue;
        };

        if stats.files_scanned >= inner.config.max_prepopulate_files {
            debug!(
                "Prepopulation ceiling reached ({} files)",
                inner.config.max_prepopulate_files
            );
            break;
        }
        stats.files_scanned += 1;

        match reader::read_file(path, inner.config.max_file_size) {
            Ok(snapshot) => {
                let bytes = snapshot.content.len() as u64;
                let mut state = inner.state.lock();
                state.cache.set(
                    &rel,
                    CacheEntry {
                        content: snapshot.content,
                        device: snapshot.device,
                        inode: snapshot.inode,
                    },
                );
                drop(state);
                stats.files_cached += 1;
                stats.bytes_cached += bytes;
            }
            Err(err) => {
                if err.is_counted() {
                    trace!("Skipping {} during prepopulation: {}", rel, err);
                    stats.errors += 1;
                    inner.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    stats.elapsed_ms = start.elapsed().as_millis() as u64;
    info!(
        "Prepopulated {} of {} files ({} bytes) in {} ms",
        stats.files_cached, stats.files_scanned, stats.bytes_cached, stats.elapsed_ms
    );
    stats
}
