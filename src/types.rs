//! Core data types used throughout the Watchpoint library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Observed transitions**: [`Change`], [`ChangeKind`], [`ChangeMeta`]:
//!   one record per observed file transition, with per-kind metadata
//! - **Markers**: [`Checkpoint`], timestamps delimiting turns of work
//! - **Operations**: [`RevertResult`], [`MonitorStats`], [`PrepopulateStats`]
//! - **Configuration**: [`MonitorConfig`], [`StartOptions`], [`StopOptions`]
//! - **Host surface**: [`SessionEvent`], [`WatchHandle`], [`ToolArgs`]
//!
//! All paths carried by these types are root-relative with forward-slash
//! separators; conversion to absolute paths happens only at the reader and
//! revert boundaries.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::PathBuf;

/// Kind of an observed file transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// File appeared where the monitor believed none existed
    Created,
    /// Content differs from the monitor's cached belief
    Modified,
    /// File disappeared while the monitor believed it existed
    Deleted,
    /// Inferred from a delete/create pair sharing an inode or fingerprint
    Renamed,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Renamed => "renamed",
        };
        f.write_str(s)
    }
}

/// Per-kind change metadata
///
/// Each variant carries only the fields meaningful to its kind. `device`
/// and `inode` come from the stat observed at read time and feed rename
/// inference; sizes are byte lengths of the captured snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChangeMeta {
    /// Metadata for a `created` record
    Created {
        /// Device id of the file at read time
        device: u64,
        /// Inode of the file at read time
        inode: u64,
        /// Byte length of the new content
        size: u64,
    },
    /// Metadata for a `modified` record
    Modified {
        /// Device id of the file at read time
        device: u64,
        /// Inode of the file at read time
        inode: u64,
        /// Byte length of the prior content
        old_size: u64,
        /// Byte length of the new content
        new_size: u64,
    },
    /// Metadata for a `deleted` record
    Deleted {
        /// Device id the file had when last observed
        device: u64,
        /// Inode the file had when last observed
        inode: u64,
        /// Byte length of the content that was removed
        old_size: u64,
    },
    /// Metadata for a `renamed` record
    Renamed {
        /// Path the file had before the rename
        old_path: String,
        /// Device id of the file at its new path
        device: u64,
        /// Inode of the file at its new path
        inode: u64,
        /// Byte length of the content before the rename
        old_size: u64,
        /// Byte length of the content after the rename
        new_size: u64,
    },
}

impl ChangeMeta {
    /// The `(device, inode)` pair recorded with this change
    pub fn device_inode(&self) -> (u64, u64) {
        match *self {
            ChangeMeta::Created { device, inode, .. }
            | ChangeMeta::Modified { device, inode, .. }
            | ChangeMeta::Deleted { device, inode, .. }
            | ChangeMeta::Renamed { device, inode, .. } => (device, inode),
        }
    }

    /// The pre-rename path, for `renamed` records
    pub fn old_path(&self) -> Option<&str> {
        match self {
            ChangeMeta::Renamed { old_path, .. } => Some(old_path),
            _ => None,
        }
    }
}

/// How a tagged tool's path claim compared to the change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attribution {
    /// The tool declared this path (or an ancestor of it)
    Confirmed,
    /// The tool made a different path claim
    Ambiguous,
}

/// Path claim supplied with a tagging call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolArgs {
    /// Path (root-relative) the tool claims to have touched; attribution
    /// is `Confirmed` for changes at or under this path. When absent,
    /// attribution is `Confirmed` unconditionally.
    pub filepath: Option<String>,
}

/// A record of a single observed transition of a single file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Root-relative path; for renames, the new path
    pub path: String,
    /// Transition kind
    pub kind: ChangeKind,
    /// Content before the change; absent for `created`
    pub old_content: Option<Vec<u8>>,
    /// Content after the change; absent for `deleted`
    pub new_content: Option<Vec<u8>>,
    /// Monotonic nanoseconds, strictly increasing within a session
    pub timestamp: u64,
    /// Logical origin; defaults to the session's workspace label
    pub tool_name: String,
    /// Additional attributions applied by tagging
    pub tools: Vec<String>,
    /// Result of path-claim validation from the most recent tagging
    pub attribution: Option<Attribution>,
    /// `tool_name` as it was before the first tagging touched this record
    pub original_tool: Option<String>,
    /// Per-kind metadata
    pub meta: ChangeMeta,
}

impl Change {
    /// Lossy UTF-8 view of the prior content
    pub fn old_text(&self) -> Option<Cow<'_, str>> {
        self.old_content.as_deref().map(String::from_utf8_lossy)
    }

    /// Lossy UTF-8 view of the new content
    pub fn new_text(&self) -> Option<Cow<'_, str>> {
        self.new_content.as_deref().map(String::from_utf8_lossy)
    }
}

/// A timestamp marker delimiting a turn or batch of work
///
/// `timestamp` is the authoritative boundary for filtering and revert;
/// `change_count` is informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Monotonic nanoseconds from the session clock
    pub timestamp: u64,
    /// Length of the change log when the checkpoint was stamped
    pub change_count: usize,
    /// Optional human-readable label
    pub label: Option<String>,
    /// 1-based ordinal of this checkpoint within its session
    pub cycle: Option<u64>,
}

/// Result of a revert operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevertResult {
    /// The change log after truncation
    pub new_changes: Vec<Change>,
    /// The checkpoint list after truncation
    pub new_checkpoints: Vec<Checkpoint>,
    /// Number of change records whose effects were undone
    pub reverted_count: usize,
    /// Number of per-file actions that failed; failures never abort the batch
    pub error_count: usize,
    /// Whether this revert targeted the pre-session state
    pub is_full_revert: bool,
    /// Root-relative paths whose on-disk content was written or removed;
    /// hosts use this to refresh any open buffers
    pub refreshed: Vec<String>,
}

/// Counters over a session's change log and watch state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorStats {
    /// Number of `created` records
    pub created: usize,
    /// Number of `modified` records
    pub modified: usize,
    /// Number of `deleted` records
    pub deleted: usize,
    /// Number of `renamed` records
    pub renamed: usize,
    /// Distinct tool names seen across `tool_name` and `tools`
    pub tools: Vec<String>,
    /// Number of active watches (0 or 1)
    pub active_watches: usize,
    /// Recoverable reader/prepopulator errors absorbed so far
    pub errors: u64,
}

/// Statistics delivered to `on_ready` once prepopulation completes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrepopulateStats {
    /// Regular files visited by the walk
    pub files_scanned: usize,
    /// Files whose content was cached
    pub files_cached: usize,
    /// Total bytes inserted into the cache
    pub bytes_cached: u64,
    /// Files skipped due to read errors (oversize, binary, I/O)
    pub errors: usize,
    /// Directories visited by the walk
    pub directories_scanned: usize,
    /// Wall-clock duration of the walk
    pub elapsed_ms: u64,
}

/// Configuration for a session's monitor
///
/// Installed globally with [`SessionRegistry::setup`] and snapshotted per
/// session at creation time.
///
/// [`SessionRegistry::setup`]: crate::SessionRegistry::setup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Intake debounce window in milliseconds
    pub debounce_ms: u64,
    /// Per-file read ceiling in bytes
    pub max_file_size: u64,
    /// Prepopulation walk ceiling (total files)
    pub max_prepopulate_files: usize,
    /// Prepopulation directory descent ceiling
    pub max_depth: usize,
    /// LRU content cache ceiling per watch, in bytes
    pub max_cache_bytes: u64,
    /// Additional drop patterns (regular expressions)
    pub ignore_patterns: Vec<String>,
    /// Whether to consult the ignore file at the watch root
    pub respect_gitignore: bool,
    /// Patterns that override both ignore-file and user patterns
    pub never_ignore: Vec<String>,
    /// Enable diagnostic logging
    pub debug: bool,
    /// Write diagnostic logging to this file instead of stderr
    pub debug_file: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            max_file_size: 2 * 1024 * 1024,
            max_prepopulate_files: 2000,
            max_depth: 6,
            max_cache_bytes: 50 * 1024 * 1024,
            ignore_patterns: Vec::new(),
            respect_gitignore: true,
            never_ignore: Vec::new(),
            debug: false,
            debug_file: None,
        }
    }
}

impl MonitorConfig {
    /// Set the intake debounce window
    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Set the per-file read ceiling
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Set the prepopulation file ceiling
    pub fn with_max_prepopulate_files(mut self, count: usize) -> Self {
        self.max_prepopulate_files = count;
        self
    }

    /// Set the prepopulation descent ceiling
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set the cache byte ceiling
    pub fn with_max_cache_bytes(mut self, bytes: u64) -> Self {
        self.max_cache_bytes = bytes;
        self
    }

    /// Add user drop patterns (regular expressions)
    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    /// Toggle ignore-file consultation at the watch root
    pub fn with_respect_gitignore(mut self, respect: bool) -> Self {
        self.respect_gitignore = respect;
        self
    }

    /// Set patterns that override every other drop rule
    pub fn with_never_ignore(mut self, patterns: Vec<String>) -> Self {
        self.never_ignore = patterns;
        self
    }
}

/// Callback invoked once prepopulation completes
pub type ReadyCallback = Box<dyn FnOnce(PrepopulateStats) + Send + 'static>;

/// Options for starting (or resuming) a watch
pub struct StartOptions {
    /// Walk the root and populate the cache before relying on diffs
    pub prepopulate: bool,
    /// Watch subdirectories recursively
    pub recursive: bool,
    /// Invoked once all scheduled prepopulation reads have completed
    pub on_ready: Option<ReadyCallback>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            prepopulate: true,
            recursive: true,
            on_ready: None,
        }
    }
}

impl std::fmt::Debug for StartOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartOptions")
            .field("prepopulate", &self.prepopulate)
            .field("recursive", &self.recursive)
            .field("on_ready", &self.on_ready.is_some())
            .finish()
    }
}

/// Decision callback consulted when stopping a session that has recorded
/// changes; receives the change count
pub type StopDecision = Box<dyn FnOnce(usize) -> bool + Send + 'static>;

/// Options for stopping a session
#[derive(Default)]
pub struct StopOptions {
    /// Stop without consulting the decision callback
    pub force: bool,
    /// Host-supplied confirmation; without it a non-empty session refuses
    /// to stop unless `force` is set
    pub confirm: Option<StopDecision>,
}

impl std::fmt::Debug for StopOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopOptions")
            .field("force", &self.force)
            .field("confirm", &self.confirm.is_some())
            .finish()
    }
}

/// Options for creating a session
#[derive(Debug, Clone, Default)]
pub struct CreateSessionOptions {
    /// Explicit session id; auto-generated when absent
    pub id: Option<String>,
    /// Opaque host metadata attached to the session
    pub metadata: HashMap<String, String>,
}

/// Handle identifying an active watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchHandle {
    /// Session owning the watch
    pub session_id: String,
    /// Root directory being watched
    pub root: PathBuf,
}

/// Events delivered to registry subscribers
///
/// Dispatch is synchronous with the operation that produced the event; a
/// `FileChanged` subscriber observes the log already containing the record.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A watch was established
    Started {
        /// Session owning the watch
        session_id: String,
        /// Root directory being watched
        root: PathBuf,
    },
    /// A watch was destroyed (pause, stop, or destroy)
    Stopped {
        /// Session that owned the watch
        session_id: String,
    },
    /// A checkpoint was stamped
    Checkpoint {
        /// Session the checkpoint belongs to
        session_id: String,
        /// The stamped checkpoint
        checkpoint: Checkpoint,
    },
    /// A change record was appended to the log
    FileChanged {
        /// Session the change belongs to
        session_id: String,
        /// The appended record
        change: Change,
    },
}
