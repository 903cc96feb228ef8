//! Sessions and the session registry
//!
//! A [`Session`] is the unit of observation: it owns one monitor and with
//! it the content cache, the change log, the checkpoint list, and (while
//! watching) the OS watch. The [`SessionRegistry`] owns all sessions and is
//! the public entry point for every lifecycle operation and query.
//!
//! Lifecycle per session:
//!
//! ```text
//!            create           start          pause
//! [nonexistent] ───→ [idle] ────→ [watching] ───→ [idle]
//!                      │             │  ↑              │
//!                      │          resume            destroy
//!                      ├────── destroy ────→ [terminal] ┘
//!                      └────── stop ───────→ [terminal]
//! ```
//!
//! The registry is an explicit object owned by the host, not a singleton;
//! hosts embedding several independent trackers create several registries.

use crate::monitor::{Monitor, SubscriberSet};
use crate::types::{
    Change, Checkpoint, CreateSessionOptions, MonitorConfig, MonitorStats, RevertResult,
    SessionEvent, StartOptions, StopOptions, ToolArgs, WatchHandle,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Once};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Watching,
    Terminal,
}

impl Lifecycle {
    fn as_str(self) -> &'static str {
        match self {
            Lifecycle::Idle => "idle",
            Lifecycle::Watching => "watching",
            Lifecycle::Terminal => "terminal",
        }
    }
}

/// The unit of observation: one monitor plus lifecycle state
pub struct Session {
    id: String,
    started_at: DateTime<Utc>,
    metadata: HashMap<String, String>,
    monitor: Monitor,
    lifecycle: Mutex<Lifecycle>,
}

impl Session {
    /// Session identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wall-clock creation time
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Opaque host metadata supplied at creation
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Establish a watch. Only valid from `idle`; when the same root is
    /// already being watched, the existing handle is returned.
    ///
    /// `target` defaults to the process working directory. Returns `None`
    /// when the watch cannot be established or the session is terminal.
    pub fn start(&self, target: Option<&Path>, options: StartOptions) -> Option<WatchHandle> {
        let lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Terminal => {
                warn!("Session {} is terminal; cannot start", self.id);
                return None;
            }
            Lifecycle::Watching => {
                // The monitor resolves same-root restarts to the existing
                // handle and refuses a second root.
            }
            Lifecycle::Idle => {}
        }

        let cwd;
        let root = match target {
            Some(path) => path,
            None => {
                cwd = std::env::current_dir().ok()?;
                &cwd
            }
        };

        let handle = self.monitor.start_watch(root, options)?;
        drop(lifecycle);
        *self.lifecycle.lock() = Lifecycle::Watching;
        Some(handle)
    }

    /// Halt intake, drain pending paths, destroy the watch, and return the
    /// changes recorded during this watch interval. Log and checkpoints
    /// are preserved; the session returns to `idle`.
    pub fn pause(&self) -> Option<Vec<Change>> {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle != Lifecycle::Watching {
            debug!(
                "Session {} is {}; nothing to pause",
                self.id,
                lifecycle.as_str()
            );
            return None;
        }
        let changes = self.monitor.pause_watch()?;
        *lifecycle = Lifecycle::Idle;
        Some(changes)
    }

    /// Equivalent to [`Session::start`] on a paused session
    pub fn resume(&self, target: Option<&Path>, options: StartOptions) -> Option<WatchHandle> {
        self.start(target, options)
    }

    /// Stop the session. With recorded changes and no `force`, the
    /// host-supplied decision callback is consulted; without one the stop
    /// is refused. Returns whether the session was terminated.
    pub fn stop(&self, options: StopOptions) -> bool {
        let change_count = self.monitor.all_changes().len();
        if change_count > 0 && !options.force {
            let confirmed = match options.confirm {
                Some(decide) => decide(change_count),
                None => false,
            };
            if !confirmed {
                debug!(
                    "Stop of session {} refused ({} changes recorded)",
                    self.id, change_count
                );
                return false;
            }
        }
        self.terminate();
        true
    }

    /// Tear down the watch, await outstanding work, and release the cache.
    pub(crate) fn terminate(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == Lifecycle::Terminal {
            return;
        }
        if *lifecycle == Lifecycle::Watching {
            self.monitor.stop_watch();
        }
        self.monitor.clear_cache();
        *lifecycle = Lifecycle::Terminal;
        info!("Session {} terminated", self.id);
    }

    /// Stamp a checkpoint at the current position in the change log
    pub fn create_checkpoint(&self, label: Option<String>) -> Checkpoint {
        self.monitor.create_checkpoint(label)
    }

    /// Copy of the checkpoint list
    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.monitor.checkpoints()
    }

    /// Defensive copy of the full change log
    pub fn changes(&self) -> Vec<Change> {
        self.monitor.all_changes()
    }

    /// Changes strictly after a checkpoint
    pub fn changes_since(&self, checkpoint: &Checkpoint) -> Vec<Change> {
        self.monitor.changes_since(checkpoint)
    }

    /// Force the debounce timer, wait for pending paths to be processed,
    /// then return an up-to-date snapshot of the log.
    pub fn flush_pending_and_get_changes(&self) -> Vec<Change> {
        self.monitor.flush();
        self.monitor.all_changes()
    }

    /// Revert the filesystem and log to the state at a checkpoint (1-based
    /// index into the checkpoint list)
    pub fn revert_to_checkpoint(&self, index: usize) -> Option<RevertResult> {
        self.monitor.revert_to_checkpoint(index)
    }

    /// Revert the filesystem to the pre-session state; log and checkpoint
    /// list end up empty
    pub fn revert_to_original(&self) -> Option<RevertResult> {
        self.monitor.revert_to_original()
    }

    /// Tag changes in `[start_ns, end_ns]` with a tool attribution
    pub fn tag_changes(&self, start_ns: u64, end_ns: u64, tool: &str, args: &ToolArgs) -> usize {
        self.monitor.tag_changes_in_range(start_ns, end_ns, tool, args)
    }

    /// Counters over the log plus watch and error state
    pub fn stats(&self) -> MonitorStats {
        self.monitor.stats()
    }

    /// Serialize the change log to pretty JSON for host-side viewers and
    /// diagnostics dumps
    pub fn changes_to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(&self.monitor.all_changes())?)
    }

    /// Handle of the active watch, if any
    pub fn watch_handle(&self) -> Option<WatchHandle> {
        self.monitor.watch_handle()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .field("lifecycle", &self.lifecycle.lock().as_str())
            .finish()
    }
}

/// Process-wide owner of sessions and global configuration
pub struct SessionRegistry {
    config: RwLock<MonitorConfig>,
    sessions: DashMap<String, Arc<Session>>,
    subscribers: Arc<SubscriberSet>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create an empty registry with default configuration
    pub fn new() -> Self {
        Self {
            config: RwLock::new(MonitorConfig::default()),
            sessions: DashMap::new(),
            subscribers: Arc::new(SubscriberSet::new()),
        }
    }

    /// Install global configuration; idempotent. Sessions snapshot the
    /// configuration at creation time, so existing sessions are unaffected.
    pub fn setup(&self, config: MonitorConfig) {
        init_logging(&config);
        *self.config.write() = config;
    }

    /// Register a callback for [`SessionEvent`]s from every session.
    /// Dispatch is synchronous with the operation producing the event.
    pub fn subscribe(&self, subscriber: impl Fn(&SessionEvent) + Send + Sync + 'static) {
        self.subscribers.add(Box::new(subscriber));
    }

    /// Create a session. Ids are unique; when a caller-supplied id already
    /// exists, the existing session is returned.
    pub fn create_session(&self, options: CreateSessionOptions) -> Arc<Session> {
        let id = options
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Some(existing) = self.sessions.get(&id) {
            debug!("Session {} already exists", id);
            return Arc::clone(&existing);
        }

        let session = Arc::new(Session {
            monitor: Monitor::new(
                id.clone(),
                self.config.read().clone(),
                Arc::clone(&self.subscribers),
            ),
            id: id.clone(),
            started_at: Utc::now(),
            metadata: options.metadata,
            lifecycle: Mutex::new(Lifecycle::Idle),
        });
        self.sessions.insert(id.clone(), Arc::clone(&session));
        info!("Created session {}", id);
        session
    }

    /// Look up a session by id
    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(&s))
    }

    /// Snapshot of all registered sessions
    pub fn get_all_sessions(&self) -> HashMap<String, Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Start watching; see [`Session::start`]
    pub fn start(
        &self,
        id: &str,
        target: Option<&Path>,
        options: StartOptions,
    ) -> Option<WatchHandle> {
        self.get_session(id)?.start(target, options)
    }

    /// Pause watching; see [`Session::pause`]
    pub fn pause(&self, id: &str) -> Option<Vec<Change>> {
        self.get_session(id)?.pause()
    }

    /// Resume watching; see [`Session::resume`]
    pub fn resume(
        &self,
        id: &str,
        target: Option<&Path>,
        options: StartOptions,
    ) -> Option<WatchHandle> {
        self.get_session(id)?.resume(target, options)
    }

    /// Stop a session, removing it from the registry on success
    pub fn stop(&self, id: &str, options: StopOptions) -> bool {
        let Some(session) = self.get_session(id) else {
            return false;
        };
        if session.stop(options) {
            self.sessions.remove(id);
            true
        } else {
            false
        }
    }

    /// Destroy a session unconditionally: stop any watch, await outstanding
    /// work, release its cache, and remove it from the registry.
    pub fn destroy(&self, id: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        session.terminate();
        true
    }

    /// Destroy every session
    pub fn clear_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.destroy(&id);
        }
    }

    /// Stamp a checkpoint for a session
    pub fn create_checkpoint(&self, id: &str, label: Option<String>) -> Option<Checkpoint> {
        Some(self.get_session(id)?.create_checkpoint(label))
    }

    /// Checkpoint list for a session; empty when the session is unknown
    pub fn get_checkpoints(&self, id: &str) -> Vec<Checkpoint> {
        self.get_session(id)
            .map(|s| s.checkpoints())
            .unwrap_or_default()
    }

    /// Change log snapshot for a session; empty when the session is unknown
    pub fn get_changes(&self, id: &str) -> Vec<Change> {
        self.get_session(id).map(|s| s.changes()).unwrap_or_default()
    }

    /// Flush pending events through the processor and return an up-to-date
    /// snapshot of the session's log
    pub fn flush_pending_and_get_changes(&self, id: &str) -> Option<Vec<Change>> {
        Some(self.get_session(id)?.flush_pending_and_get_changes())
    }

    /// Revert a session to a checkpoint (1-based index)
    pub fn revert_to_checkpoint(&self, id: &str, index: usize) -> Option<RevertResult> {
        self.get_session(id)?.revert_to_checkpoint(index)
    }

    /// Revert a session to its pre-session state
    pub fn revert_to_original(&self, id: &str) -> Option<RevertResult> {
        self.get_session(id)?.revert_to_original()
    }

    /// Tag a session's changes in a timestamp range; returns the number of
    /// records touched
    pub fn tag_changes(
        &self,
        id: &str,
        start_ns: u64,
        end_ns: u64,
        tool: &str,
        args: &ToolArgs,
    ) -> usize {
        self.get_session(id)
            .map(|s| s.tag_changes(start_ns, end_ns, tool, args))
            .unwrap_or(0)
    }

    /// Statistics for a session
    pub fn get_stats(&self, id: &str) -> Option<MonitorStats> {
        Some(self.get_session(id)?.stats())
    }
}

/// Install the diagnostic subscriber once per process when debug logging
/// is requested. Tolerates a host-installed subscriber already being
/// present.
fn init_logging(config: &MonitorConfig) {
    static INIT: Once = Once::new();
    if !config.debug {
        return;
    }
    let debug_file = config.debug_file.clone();
    INIT.call_once(move || {
        match debug_file {
            Some(path) => {
                match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
                    Ok(file) => {
                        tracing_subscriber::fmt()
                            .with_max_level(tracing::Level::DEBUG)
                            .with_ansi(false)
                            .with_writer(Arc::new(file))
                            .try_init()
                            .ok();
                    }
                    Err(err) => {
                        eprintln!("watchpoint: cannot open debug file {:?}: {}", path, err);
                    }
                }
            }
            None => {
                tracing_subscriber::fmt()
                    .with_max_level(tracing::Level::DEBUG)
                    .try_init()
                    .ok();
            }
        }
    });
}
