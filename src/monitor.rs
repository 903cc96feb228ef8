//! The Monitor: change processing, the change log, and checkpoints
//!
//! ## Overview
//!
//! Each session owns one `Monitor`. The monitor owns the content cache, the
//! append-only change log, the checkpoint list, and (while watching) the OS
//! watch with its debounce worker. The worker hands each changed path to
//! [`MonitorInner::process_path`], which reads the file, diffs it against
//! the cache, and appends at most one change record:
//!
//! - read fails with not-found and the cache has the path → `deleted`
//! - read succeeds and the cache lacks the path → `created` (subject to
//!   rename inference against recent `deleted` records)
//! - read succeeds and the content differs from the cache → `modified`
//! - anything else → no record
//!
//! A single mutex guards the (log, cache, checkpoints) triple; every
//! processor run mutates all three coherently before releasing it, and the
//! single worker thread serializes runs, so timestamps are strictly
//! monotonic and the cache always reflects the tail of the log.
//!
//! ## Rename inference
//!
//! OS backends commonly report a rename as an unrelated delete and create.
//! When a `created` record is about to be appended, the log tail is walked
//! backwards over recent `deleted` records; a match on `(device, inode)` or
//! on a content fingerprint (length plus hashed head and tail windows)
//! replaces the pair with a single `renamed` record.

use crate::cache::{CacheEntry, ContentCache};
use crate::error::{ReadError, WatchpointError};
use crate::filter::IgnoreFilter;
use crate::prepopulate;
use crate::reader::{self, FileSnapshot};
use crate::revert;
use crate::types::{
    Attribution, Change, ChangeKind, ChangeMeta, Checkpoint, MonitorConfig, MonitorStats,
    PrepopulateStats, RevertResult, SessionEvent, StartOptions, ToolArgs, WatchHandle,
};
use crate::utils;
use crate::watcher::{PathProcessor, WatchTask};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Two records of the same path and kind within this window collapse
const DUPLICATE_WINDOW_NS: u64 = 1_000_000_000;
/// Duplicate scan may stop once records are older than this
const DUPLICATE_SCAN_STOP_NS: u64 = 5_000_000_000;
/// A delete/create pair further apart than this is never a rename
const RENAME_WINDOW_NS: u64 = 2_000_000_000;
/// Bytes hashed from each end of the content for the rename fingerprint
const FINGERPRINT_WINDOW: usize = 1024;

/// Registered event callbacks, shared between the registry and monitors
pub(crate) struct SubscriberSet {
    subscribers: RwLock<Vec<Box<dyn Fn(&SessionEvent) + Send + Sync>>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, subscriber: Box<dyn Fn(&SessionEvent) + Send + Sync>) {
        self.subscribers.write().push(subscriber);
    }

    pub fn emit(&self, event: &SessionEvent) {
        for subscriber in self.subscribers.read().iter() {
            subscriber(event);
        }
    }
}

/// Content fingerprint used by rename inference: total length plus hashes
/// of the leading and trailing windows.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    head: [u8; 32],
    tail: [u8; 32],
}

impl Fingerprint {
    fn of(data: &[u8]) -> Self {
        let window = data.len().min(FINGERPRINT_WINDOW);
        let head: [u8; 32] = Sha256::digest(&data[..window]).into();
        let tail: [u8; 32] = Sha256::digest(&data[data.len() - window..]).into();
        Self {
            len: data.len() as u64,
            head,
            tail,
        }
    }
}

/// State guarded by the monitor's single mutex
pub(crate) struct MonitorState {
    pub log: Vec<Change>,
    pub cache: ContentCache,
    pub checkpoints: Vec<Checkpoint>,
    last_timestamp: u64,
}

impl MonitorState {
    /// Allocate the next strictly monotonic timestamp
    pub fn next_timestamp(&mut self, now_ns: u64) -> u64 {
        let ts = now_ns.max(self.last_timestamp + 1);
        self.last_timestamp = ts;
        ts
    }
}

/// Monitor internals shared with the worker and prepopulation threads
pub(crate) struct MonitorInner {
    pub session_id: String,
    pub config: MonitorConfig,
    /// Workspace label; default `tool_name` for new records
    pub label: RwLock<String>,
    pub state: Mutex<MonitorState>,
    /// Session clock origin; timestamps are nanoseconds since this instant
    epoch: Instant,
    /// Gate checked by intake and by result application after teardown
    pub intake: Arc<AtomicBool>,
    /// Recoverable reader/prepopulator errors absorbed so far
    pub errors: AtomicU64,
    pub subscribers: Arc<SubscriberSet>,
    /// Root of the most recent watch; the revert engine writes under it
    last_root: Mutex<Option<PathBuf>>,
    /// Compiled ignore filters, one per watch root
    filters: Mutex<HashMap<PathBuf, Arc<IgnoreFilter>>>,
}

impl MonitorInner {
    /// Nanoseconds since the session clock origin
    pub fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Compiled filter for a root; built once per root per session
    pub fn filter_for(&self, root: &Path) -> Option<Arc<IgnoreFilter>> {
        let mut filters = self.filters.lock();
        if let Some(filter) = filters.get(root) {
            return Some(Arc::clone(filter));
        }
        match IgnoreFilter::build(root, &self.config) {
            Ok(filter) => {
                let filter = Arc::new(filter);
                filters.insert(root.to_path_buf(), Arc::clone(&filter));
                Some(filter)
            }
            Err(err) => {
                warn!("Failed to build ignore filter for {:?}: {}", root, err);
                None
            }
        }
    }

    /// Process one changed path: read, diff against the cache, and append
    /// at most one change record.
    pub fn process_path(self: &Arc<Self>, root: &Path, filter: &IgnoreFilter, abs: &Path) {
        let Some(rel) = utils::relative_slash_path(abs, root) else {
            return;
        };
        if filter.should_ignore(&rel) {
            trace!("Ignoring {}", rel);
            return;
        }

        match reader::read_file(abs, self.config.max_file_size) {
            Err(ReadError::NotFound) => self.record_missing(&rel),
            Err(err) => {
                if err.is_counted() {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    debug!("File {} unobservable: {}", rel, err);
                }
            }
            Ok(snapshot) => self.record_observed(&rel, snapshot),
        }
    }

    /// The path no longer exists; emit `deleted` if we believed it did.
    fn record_missing(self: &Arc<Self>, rel: &str) {
        let appended = {
            let mut state = self.state.lock();
            if !state.cache.contains(rel) {
                return;
            }
            // A suppressed record must leave the cached belief intact, or
            // the cache diverges from the log's last record for this path.
            if self.is_duplicate(&state, rel, ChangeKind::Deleted) {
                return;
            }
            let Some(entry) = state.cache.remove(rel) else {
                return;
            };
            let ts = state.next_timestamp(self.now_ns());
            let old_size = entry.content.len() as u64;
            let change = Change {
                path: rel.to_string(),
                kind: ChangeKind::Deleted,
                old_content: Some(entry.content),
                new_content: None,
                timestamp: ts,
                tool_name: self.label.read().clone(),
                tools: Vec::new(),
                attribution: None,
                original_tool: None,
                meta: ChangeMeta::Deleted {
                    device: entry.device,
                    inode: entry.inode,
                    old_size,
                },
            };
            state.log.push(change.clone());
            change
        };
        debug!("deleted {}", appended.path);
        self.emit_change(appended);
    }

    /// The path exists with `snapshot`; emit `created`, `modified`, or an
    /// inferred `renamed`, or nothing for a no-op write.
    fn record_observed(self: &Arc<Self>, rel: &str, snapshot: FileSnapshot) {
        let appended = {
            let mut state = self.state.lock();
            let cached = state.cache.get(rel).cloned();
            let change = match cached {
                Some(entry) if entry.content == snapshot.content => None,
                Some(entry) => self.build_modified(&mut state, rel, entry, &snapshot),
                None => self.build_created(&mut state, rel, &snapshot),
            };
            if change.is_some() {
                state.cache.set(
                    rel,
                    CacheEntry {
                        content: snapshot.content,
                        device: snapshot.device,
                        inode: snapshot.inode,
                    },
                );
            }
            if let Some(change) = &change {
                state.log.push(change.clone());
            }
            change
        };
        if let Some(change) = appended {
            debug!("{} {}", change.kind, change.path);
            self.emit_change(change);
        }
    }

    fn build_modified(
        &self,
        state: &mut MonitorState,
        rel: &str,
        entry: CacheEntry,
        snapshot: &FileSnapshot,
    ) -> Option<Change> {
        if self.is_duplicate(state, rel, ChangeKind::Modified) {
            return None;
        }
        let ts = state.next_timestamp(self.now_ns());
        Some(Change {
            path: rel.to_string(),
            kind: ChangeKind::Modified,
            old_content: Some(entry.content.clone()),
            new_content: Some(snapshot.content.clone()),
            timestamp: ts,
            tool_name: self.label.read().clone(),
            tools: Vec::new(),
            attribution: None,
            original_tool: None,
            meta: ChangeMeta::Modified {
                device: snapshot.device,
                inode: snapshot.inode,
                old_size: entry.content.len() as u64,
                new_size: snapshot.content.len() as u64,
            },
        })
    }

    fn build_created(
        &self,
        state: &mut MonitorState,
        rel: &str,
        snapshot: &FileSnapshot,
    ) -> Option<Change> {
        if self.is_duplicate(state, rel, ChangeKind::Created) {
            return None;
        }

        if let Some(idx) = self.find_rename_source(state, snapshot) {
            let displaced = state.log.remove(idx);
            let ts = state.next_timestamp(self.now_ns());
            let old_size = displaced
                .old_content
                .as_ref()
                .map(|c| c.len() as u64)
                .unwrap_or(0);
            info!("Inferred rename {} -> {}", displaced.path, rel);
            return Some(Change {
                path: rel.to_string(),
                kind: ChangeKind::Renamed,
                old_content: displaced.old_content,
                new_content: Some(snapshot.content.clone()),
                timestamp: ts,
                tool_name: self.label.read().clone(),
                tools: Vec::new(),
                attribution: None,
                original_tool: None,
                meta: ChangeMeta::Renamed {
                    old_path: displaced.path,
                    device: snapshot.device,
                    inode: snapshot.inode,
                    old_size,
                    new_size: snapshot.content.len() as u64,
                },
            });
        }

        let ts = state.next_timestamp(self.now_ns());
        Some(Change {
            path: rel.to_string(),
            kind: ChangeKind::Created,
            old_content: None,
            new_content: Some(snapshot.content.clone()),
            timestamp: ts,
            tool_name: self.label.read().clone(),
            tools: Vec::new(),
            attribution: None,
            original_tool: None,
            meta: ChangeMeta::Created {
                device: snapshot.device,
                inode: snapshot.inode,
                size: snapshot.content.len() as u64,
            },
        })
    }

    /// Walk the log tail for a recent `deleted` record matching the new
    /// content by inode or by fingerprint. Returns its index.
    fn find_rename_source(&self, state: &MonitorState, snapshot: &FileSnapshot) -> Option<usize> {
        let now = self.now_ns();
        let mut new_fingerprint: Option<Fingerprint> = None;

        for (idx, record) in state.log.iter().enumerate().rev() {
            if now.saturating_sub(record.timestamp) > RENAME_WINDOW_NS {
                break;
            }
            if record.kind != ChangeKind::Deleted {
                continue;
            }
            let (device, inode) = record.meta.device_inode();
            if inode != 0 && device == snapshot.device && inode == snapshot.inode {
                trace!("Rename source {} matched by inode", record.path);
                return Some(idx);
            }
            if let Some(old_content) = &record.old_content {
                let fp = new_fingerprint
                    .get_or_insert_with(|| Fingerprint::of(&snapshot.content));
                if Fingerprint::of(old_content) == *fp {
                    trace!("Rename source {} matched by fingerprint", record.path);
                    return Some(idx);
                }
            }
        }
        None
    }

    /// Whether an equivalent record was appended within the duplicate
    /// window. The scan stops at the first record older than the stop
    /// horizon.
    fn is_duplicate(&self, state: &MonitorState, rel: &str, kind: ChangeKind) -> bool {
        let now = self.now_ns();
        for record in state.log.iter().rev() {
            let age = now.saturating_sub(record.timestamp);
            if age > DUPLICATE_SCAN_STOP_NS {
                break;
            }
            if record.path == rel && record.kind == kind && age <= DUPLICATE_WINDOW_NS {
                debug!("Suppressing duplicate {} for {}", kind, rel);
                return true;
            }
        }
        false
    }

    fn emit_change(self: &Arc<Self>, change: Change) {
        self.subscribers.emit(&SessionEvent::FileChanged {
            session_id: self.session_id.clone(),
            change,
        });
    }
}

struct ActiveWatch {
    task: WatchTask,
    handle: WatchHandle,
    started_ns: u64,
    prepopulator: Option<JoinHandle<()>>,
    cancel_prepopulate: Arc<AtomicBool>,
}

/// Per-session monitor owning cache, log, checkpoints, and the watch
pub(crate) struct Monitor {
    pub inner: Arc<MonitorInner>,
    watch: Mutex<Option<ActiveWatch>>,
}

impl Monitor {
    pub fn new(session_id: String, config: MonitorConfig, subscribers: Arc<SubscriberSet>) -> Self {
        let max_cache_bytes = config.max_cache_bytes;
        Self {
            inner: Arc::new(MonitorInner {
                label: RwLock::new(session_id.clone()),
                session_id,
                config,
                state: Mutex::new(MonitorState {
                    log: Vec::new(),
                    cache: ContentCache::new(max_cache_bytes),
                    checkpoints: Vec::new(),
                    last_timestamp: 0,
                }),
                epoch: Instant::now(),
                intake: Arc::new(AtomicBool::new(false)),
                errors: AtomicU64::new(0),
                subscribers,
                last_root: Mutex::new(None),
                filters: Mutex::new(HashMap::new()),
            }),
            watch: Mutex::new(None),
        }
    }

    /// Establish a watch on `root`. Returns the existing handle when the
    /// same root is already being watched, `None` on failure or when a
    /// different root is active.
    pub fn start_watch(&self, root: &Path, options: StartOptions) -> Option<WatchHandle> {
        let root = match root.canonicalize() {
            Ok(canonical) if canonical.is_dir() => canonical,
            Ok(other) => {
                warn!("Watch target {:?} is not a directory", other);
                return None;
            }
            Err(err) => {
                warn!("Watch target {:?} unusable: {}", root, err);
                return None;
            }
        };

        let mut watch = self.watch.lock();
        if let Some(active) = watch.as_ref() {
            if active.handle.root == root {
                debug!("Watch already active for {:?}", root);
                return Some(active.handle.clone());
            }
            warn!(
                "Session {} already watching {:?}; refusing {:?}",
                self.inner.session_id, active.handle.root, root
            );
            return None;
        }

        let filter = self.inner.filter_for(&root)?;

        if let Some(name) = root.file_name() {
            *self.inner.label.write() = name.to_string_lossy().into_owned();
        }
        *self.inner.last_root.lock() = Some(root.clone());

        let started_ns = self.inner.now_ns();
        self.inner.intake.store(true, Ordering::Release);

        let processor: PathProcessor = {
            let inner = Arc::clone(&self.inner);
            let root = root.clone();
            let filter = Arc::clone(&filter);
            Arc::new(move |path: &Path| inner.process_path(&root, &filter, path))
        };

        let task = match WatchTask::spawn(
            root.clone(),
            options.recursive,
            Duration::from_millis(self.inner.config.debounce_ms),
            Arc::clone(&self.inner.intake),
            processor,
        ) {
            Ok(task) => task,
            Err(err) => {
                warn!(
                    "{}",
                    WatchpointError::watch_start(&root, err.to_string())
                );
                self.inner.intake.store(false, Ordering::Release);
                return None;
            }
        };

        let cancel_prepopulate = Arc::new(AtomicBool::new(false));
        let prepopulator = if options.prepopulate {
            let inner = Arc::clone(&self.inner);
            let walk_root = root.clone();
            let walk_filter = Arc::clone(&filter);
            let cancel = Arc::clone(&cancel_prepopulate);
            let on_ready = options.on_ready;
            std::thread::Builder::new()
                .name("watchpoint-prepopulate".to_string())
                .spawn(move || {
                    let stats = prepopulate::run(&inner, &walk_root, &walk_filter, &cancel);
                    if let Some(callback) = on_ready {
                        callback(stats);
                    }
                })
                .ok()
        } else {
            if let Some(callback) = options.on_ready {
                callback(PrepopulateStats::default());
            }
            None
        };

        let handle = WatchHandle {
            session_id: self.inner.session_id.clone(),
            root: root.clone(),
        };
        *watch = Some(ActiveWatch {
            task,
            handle: handle.clone(),
            started_ns,
            prepopulator,
            cancel_prepopulate,
        });
        drop(watch);

        self.inner.subscribers.emit(&SessionEvent::Started {
            session_id: self.inner.session_id.clone(),
            root,
        });
        Some(handle)
    }

    /// Halt intake, drain pending paths through the processor, destroy the
    /// watch, and return the changes recorded during this watch interval.
    pub fn pause_watch(&self) -> Option<Vec<Change>> {
        let active = self.watch.lock().take()?;
        self.inner.intake.store(false, Ordering::Release);

        active.task.flush();
        active.cancel_prepopulate.store(true, Ordering::Release);
        if let Some(handle) = active.prepopulator {
            let _ = handle.join();
        }
        active.task.shutdown();

        let changes: Vec<Change> = {
            let state = self.inner.state.lock();
            state
                .log
                .iter()
                .filter(|c| c.timestamp >= active.started_ns)
                .cloned()
                .collect()
        };

        self.inner.subscribers.emit(&SessionEvent::Stopped {
            session_id: self.inner.session_id.clone(),
        });
        Some(changes)
    }

    /// Destroy the watch without draining: cancel the timer, discard
    /// pending paths, and await any in-flight batch.
    pub fn stop_watch(&self) -> bool {
        let Some(active) = self.watch.lock().take() else {
            return false;
        };
        self.inner.intake.store(false, Ordering::Release);
        active.cancel_prepopulate.store(true, Ordering::Release);
        active.task.shutdown();
        if let Some(handle) = active.prepopulator {
            let _ = handle.join();
        }
        self.inner.subscribers.emit(&SessionEvent::Stopped {
            session_id: self.inner.session_id.clone(),
        });
        true
    }

    pub fn watch_handle(&self) -> Option<WatchHandle> {
        self.watch.lock().as_ref().map(|w| w.handle.clone())
    }

    /// Fire the debounce timer now and wait until pending paths have been
    /// processed. No-op without an active watch.
    pub fn flush(&self) {
        let watch = self.watch.lock();
        if let Some(active) = watch.as_ref() {
            active.task.flush();
        }
    }

    /// Stamp a checkpoint at the current clock position
    pub fn create_checkpoint(&self, label: Option<String>) -> Checkpoint {
        let checkpoint = {
            let mut state = self.inner.state.lock();
            let ts = state.next_timestamp(self.inner.now_ns());
            let checkpoint = Checkpoint {
                timestamp: ts,
                change_count: state.log.len(),
                label,
                cycle: Some(state.checkpoints.len() as u64 + 1),
            };
            state.checkpoints.push(checkpoint.clone());
            checkpoint
        };
        info!(
            "Checkpoint {} at {} changes",
            checkpoint.cycle.unwrap_or(0),
            checkpoint.change_count
        );
        self.inner.subscribers.emit(&SessionEvent::Checkpoint {
            session_id: self.inner.session_id.clone(),
            checkpoint: checkpoint.clone(),
        });
        checkpoint
    }

    /// Defensive copy of the full change log
    pub fn all_changes(&self) -> Vec<Change> {
        self.inner.state.lock().log.clone()
    }

    /// Changes strictly after a checkpoint's timestamp
    pub fn changes_since(&self, checkpoint: &Checkpoint) -> Vec<Change> {
        self.inner
            .state
            .lock()
            .log
            .iter()
            .filter(|c| c.timestamp > checkpoint.timestamp)
            .cloned()
            .collect()
    }

    /// Copy of the checkpoint list
    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.inner.state.lock().checkpoints.clone()
    }

    /// Tag every change in `[start_ns, end_ns]` with `tool`, validating the
    /// tool's path claim. Returns the number of records touched.
    pub fn tag_changes_in_range(
        &self,
        start_ns: u64,
        end_ns: u64,
        tool: &str,
        args: &ToolArgs,
    ) -> usize {
        let mut state = self.inner.state.lock();
        let mut tagged = 0;
        for change in state
            .log
            .iter_mut()
            .filter(|c| c.timestamp >= start_ns && c.timestamp <= end_ns)
        {
            if !change.tools.iter().any(|t| t == tool) {
                change.tools.push(tool.to_string());
            }
            let attribution = match &args.filepath {
                None => Attribution::Confirmed,
                Some(claim) => {
                    let claim = claim.trim_end_matches('/');
                    if change.path == claim
                        || change.path.starts_with(&format!("{}/", claim))
                    {
                        Attribution::Confirmed
                    } else {
                        Attribution::Ambiguous
                    }
                }
            };
            change.attribution = Some(attribution);
            if change.original_tool.is_none() {
                change.original_tool = Some(change.tool_name.clone());
            }
            tagged += 1;
        }
        debug!("Tagged {} changes with tool {}", tagged, tool);
        tagged
    }

    /// Counters over the log plus watch and error state
    pub fn stats(&self) -> MonitorStats {
        // Lock order is watch before state throughout the monitor.
        let active_watches = usize::from(self.watch.lock().is_some());
        let state = self.inner.state.lock();
        let mut stats = MonitorStats {
            active_watches,
            errors: self.inner.errors.load(Ordering::Relaxed),
            ..MonitorStats::default()
        };
        let mut tools = BTreeSet::new();
        for change in &state.log {
            match change.kind {
                ChangeKind::Created => stats.created += 1,
                ChangeKind::Modified => stats.modified += 1,
                ChangeKind::Deleted => stats.deleted += 1,
                ChangeKind::Renamed => stats.renamed += 1,
            }
            tools.insert(change.tool_name.clone());
            for tool in &change.tools {
                tools.insert(tool.clone());
            }
        }
        stats.tools = tools.into_iter().collect();
        stats
    }

    /// Revert the filesystem and log to the state at a checkpoint
    pub fn revert_to_checkpoint(&self, index: usize) -> Option<RevertResult> {
        self.with_intake_gated(|root| revert::revert_to_checkpoint(&self.inner, root, index))
    }

    /// Revert the filesystem to the pre-session state and empty the log
    pub fn revert_to_original(&self) -> Option<RevertResult> {
        self.with_intake_gated(|root| revert::revert_to_original(&self.inner, root))
    }

    /// Run a revert with intake disabled so the engine's own disk writes
    /// are not recorded as changes.
    fn with_intake_gated<F>(&self, f: F) -> Option<RevertResult>
    where
        F: FnOnce(&Path) -> Option<RevertResult>,
    {
        let root = self.inner.last_root.lock().clone()?;
        let was_enabled = self.inner.intake.swap(false, Ordering::AcqRel);
        self.flush();
        let result = f(&root);
        self.inner.intake.store(was_enabled, Ordering::Release);
        result
    }

    /// Release the cache; used at session destruction
    pub fn clear_cache(&self) {
        self.inner.state.lock().cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn monitor() -> Monitor {
        Monitor::new(
            "test-session".to_string(),
            MonitorConfig::default(),
            Arc::new(SubscriberSet::new()),
        )
    }

    fn process(m: &Monitor, root: &Path, filter: &IgnoreFilter, rel: &str) {
        m.inner.process_path(root, filter, &root.join(rel));
    }

    #[test]
    fn test_create_modify_delete_sequence() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();
        let filter = IgnoreFilter::allow_all();

        fs::write(root.join("a.txt"), "hello").unwrap();
        process(&m, root, &filter, "a.txt");
        fs::write(root.join("a.txt"), "hello world").unwrap();
        process(&m, root, &filter, "a.txt");
        fs::remove_file(root.join("a.txt")).unwrap();
        process(&m, root, &filter, "a.txt");

        let log = m.all_changes();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].kind, ChangeKind::Created);
        assert_eq!(log[0].new_content.as_deref(), Some(b"hello".as_slice()));
        assert_eq!(log[1].kind, ChangeKind::Modified);
        assert_eq!(log[1].old_content.as_deref(), Some(b"hello".as_slice()));
        assert_eq!(
            log[1].new_content.as_deref(),
            Some(b"hello world".as_slice())
        );
        assert_eq!(log[2].kind, ChangeKind::Deleted);
        assert_eq!(
            log[2].old_content.as_deref(),
            Some(b"hello world".as_slice())
        );

        // Deletion removed the monitor's belief in the file
        assert!(!m.inner.state.lock().cache.contains("a.txt"));
    }

    #[test]
    fn test_noop_write_appends_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();
        let filter = IgnoreFilter::allow_all();

        fs::write(root.join("a.txt"), "same").unwrap();
        process(&m, root, &filter, "a.txt");
        process(&m, root, &filter, "a.txt");

        assert_eq!(m.all_changes().len(), 1);
    }

    #[test]
    fn test_missing_uncached_path_is_silent() {
        let temp_dir = TempDir::new().unwrap();
        let m = monitor();
        let filter = IgnoreFilter::allow_all();

        process(&m, temp_dir.path(), &filter, "never-existed.txt");
        assert!(m.all_changes().is_empty());
    }

    #[test]
    fn test_rename_inferred_from_delete_create_pair() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();
        let filter = IgnoreFilter::allow_all();

        fs::write(root.join("x.txt"), "X").unwrap();
        process(&m, root, &filter, "x.txt");
        fs::rename(root.join("x.txt"), root.join("y.txt")).unwrap();
        process(&m, root, &filter, "x.txt");
        process(&m, root, &filter, "y.txt");

        let log = m.all_changes();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].kind, ChangeKind::Renamed);
        assert_eq!(log[1].path, "y.txt");
        assert_eq!(log[1].meta.old_path(), Some("x.txt"));
        assert_eq!(log[1].old_content.as_deref(), Some(b"X".as_slice()));
        assert_eq!(log[1].new_content.as_deref(), Some(b"X".as_slice()));
        assert!(!log.iter().any(|c| c.kind == ChangeKind::Deleted));

        let mut state = m.inner.state.lock();
        assert!(!state.cache.contains("x.txt"));
        assert_eq!(state.cache.get("y.txt").unwrap().content, b"X");
    }

    #[test]
    fn test_rename_fingerprint_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();
        let filter = IgnoreFilter::allow_all();

        let body = "fingerprint me".repeat(200);
        fs::write(root.join("old.txt"), &body).unwrap();
        process(&m, root, &filter, "old.txt");

        // Copy then delete: the new file gets a fresh inode, so only the
        // content fingerprint can connect the pair.
        fs::write(root.join("new.txt"), &body).unwrap();
        fs::remove_file(root.join("old.txt")).unwrap();
        process(&m, root, &filter, "old.txt");
        process(&m, root, &filter, "new.txt");

        let log = m.all_changes();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, ChangeKind::Renamed);
        assert_eq!(log[0].meta.old_path(), Some("old.txt"));
    }

    #[test]
    fn test_duplicate_created_suppressed_within_window() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();
        let filter = IgnoreFilter::allow_all();

        fs::write(root.join("f.txt"), "x").unwrap();
        process(&m, root, &filter, "f.txt");

        // Drop the cached belief so the next run would classify as created
        // again; the duplicate scan must reject it inside the window.
        m.inner.state.lock().cache.remove("f.txt");
        process(&m, root, &filter, "f.txt");

        assert_eq!(m.all_changes().len(), 1);
    }

    #[test]
    fn test_suppressed_delete_keeps_cached_belief() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();
        let filter = IgnoreFilter::allow_all();

        fs::write(root.join("f.txt"), "x").unwrap();
        process(&m, root, &filter, "f.txt");
        fs::remove_file(root.join("f.txt")).unwrap();
        process(&m, root, &filter, "f.txt");

        // Re-seed the cached belief, as a re-creation inside the window
        // would; the next delete is suppressed against the record above
        // and must not touch the cache.
        m.inner.state.lock().cache.set(
            "f.txt",
            CacheEntry {
                content: b"x".to_vec(),
                device: 0,
                inode: 0,
            },
        );
        process(&m, root, &filter, "f.txt");

        assert_eq!(m.all_changes().len(), 2);
        assert!(m.inner.state.lock().cache.contains("f.txt"));
    }

    #[test]
    fn test_timestamps_strictly_monotonic() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();
        let filter = IgnoreFilter::allow_all();

        for i in 0..20 {
            fs::write(root.join(format!("f{}.txt", i)), "x").unwrap();
            process(&m, root, &filter, &format!("f{}.txt", i));
        }

        let log = m.all_changes();
        assert_eq!(log.len(), 20);
        for pair in log.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[test]
    fn test_checkpoint_and_changes_since() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();
        let filter = IgnoreFilter::allow_all();

        fs::write(root.join("one.txt"), "1").unwrap();
        process(&m, root, &filter, "one.txt");
        let cp = m.create_checkpoint(Some("after one".to_string()));
        fs::write(root.join("two.txt"), "2").unwrap();
        process(&m, root, &filter, "two.txt");

        assert_eq!(cp.change_count, 1);
        assert_eq!(cp.cycle, Some(1));
        let since = m.changes_since(&cp);
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].path, "two.txt");
    }

    #[test]
    fn test_tagging_attribution() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();
        let filter = IgnoreFilter::allow_all();

        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(root.join("other.txt"), "o").unwrap();
        process(&m, root, &filter, "src/main.rs");
        process(&m, root, &filter, "other.txt");

        let tagged = m.tag_changes_in_range(
            0,
            u64::MAX,
            "editor",
            &ToolArgs {
                filepath: Some("src".to_string()),
            },
        );
        assert_eq!(tagged, 2);

        let log = m.all_changes();
        let main = log.iter().find(|c| c.path == "src/main.rs").unwrap();
        let other = log.iter().find(|c| c.path == "other.txt").unwrap();
        assert_eq!(main.attribution, Some(Attribution::Confirmed));
        assert_eq!(other.attribution, Some(Attribution::Ambiguous));
        assert!(main.tools.contains(&"editor".to_string()));
        assert_eq!(main.original_tool.as_deref(), Some(&*main.tool_name));

        // No path claim: everything is confirmed
        m.tag_changes_in_range(0, u64::MAX, "agent", &ToolArgs::default());
        let log = m.all_changes();
        assert!(log
            .iter()
            .all(|c| c.attribution == Some(Attribution::Confirmed)));
    }

    #[test]
    fn test_stats_counts_and_tools() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();
        let filter = IgnoreFilter::allow_all();

        fs::write(root.join("a.txt"), "a").unwrap();
        process(&m, root, &filter, "a.txt");
        fs::write(root.join("a.txt"), "a2").unwrap();
        process(&m, root, &filter, "a.txt");
        m.tag_changes_in_range(0, u64::MAX, "editor", &ToolArgs::default());

        let stats = m.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.modified, 1);
        assert_eq!(stats.active_watches, 0);
        assert!(stats.tools.contains(&"editor".to_string()));
        assert!(stats.tools.contains(&"test-session".to_string()));
    }

    #[test]
    fn test_ignored_path_produces_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let m = monitor();
        let filter = IgnoreFilter::build(root, &MonitorConfig::default()).unwrap();

        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        process(&m, root, &filter, ".git/HEAD");

        assert!(m.all_changes().is_empty());
    }

    #[test]
    fn test_event_emitted_on_append() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let subscribers = Arc::new(SubscriberSet::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        subscribers.add(Box::new(move |event| {
            if let SessionEvent::FileChanged { change, .. } = event {
                seen_cb.lock().push(change.path.clone());
            }
        }));
        let m = Monitor::new(
            "s".to_string(),
            MonitorConfig::default(),
            subscribers,
        );
        let filter = IgnoreFilter::allow_all();

        fs::write(root.join("evt.txt"), "x").unwrap();
        m.inner.process_path(root, &filter, &root.join("evt.txt"));

        assert_eq!(&*seen.lock(), &["evt.txt".to_string()]);
    }
}
