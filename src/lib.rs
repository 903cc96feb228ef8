//! # Watchpoint - Session-scoped filesystem change tracking
//!
//! A library for observing a working directory while an external agent
//! (such as an LLM-driven code tool) mutates files, and for letting a human
//! operator inspect and selectively undo those mutations.
//!
//! ## Overview
//!
//! A caller starts a *session* rooted at a directory. The session watches
//! for creations, modifications, deletions, and renames, groups them into
//! ordered *checkpoints* corresponding to agent turns, and supports
//! reverting the filesystem to the state captured at any checkpoint or to
//! the original pre-session state.
//!
//! OS file-system events are coarse, coalesced, and carry no content, so
//! the monitor does its own reads, diffing, and rename inference:
//!
//! - **Content cache**: a byte-bounded LRU of each tracked file's last
//!   observed content; the source of `old_content` for every record
//! - **Debounced intake**: repeated events for a path within the debounce
//!   window collapse to one processor run
//! - **Rename inference**: a delete/create pair sharing an inode or a
//!   content fingerprint becomes a single `renamed` record
//! - **Change log**: an append-only, strictly monotonic sequence of
//!   [`Change`] records; checkpoints are timestamps into it
//! - **Revert engine**: reconstructs any checkpoint's state from captured
//!   `old_content` snapshots, then truncates the log to match
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use watchpoint::{CreateSessionOptions, SessionRegistry, StartOptions};
//! use std::path::Path;
//!
//! let registry = SessionRegistry::new();
//! let session = registry.create_session(CreateSessionOptions::default());
//! let id = session.id().to_string();
//!
//! let _watch = registry.start(&id, Some(Path::new("./project")), StartOptions::default());
//!
//! // ... the agent edits files ...
//!
//! let _checkpoint = registry.create_checkpoint(&id, Some("turn 1".to_string()));
//! let changes = registry.flush_pending_and_get_changes(&id).unwrap();
//! println!("{} changes this turn", changes.len());
//!
//! // Roll the working tree back to the first checkpoint
//! let _result = registry.revert_to_checkpoint(&id, 1);
//! registry.destroy(&id);
//! ```
//!
//! ## Concurrency model
//!
//! Intake (the OS watch callback) only records pending paths and resets the
//! debounce timer. A single worker thread per watch drives all processing,
//! and one mutex guards each session's (log, cache, checkpoints) triple, so
//! processor runs are serialized and every record observes the cache state
//! left by its predecessor. Nothing persists across process restart; the
//! log and cache live only in memory.
//!
//! ## Module organization
//!
//! - [`session`]: sessions, the registry, lifecycle and queries
//! - [`types`]: change records, checkpoints, configuration, events
//! - [`filter`]: the ignore decision over tracked paths
//! - [`error`]: error types
//! - `monitor`, `watcher`, `cache`, `reader`, `prepopulate`, `revert`:
//!   internal machinery

// Public API modules
pub mod error;
pub mod filter;
pub mod session;
pub mod types;

// Internal modules (not part of public API)
mod cache;
mod monitor;
mod prepopulate;
mod reader;
mod revert;
mod utils;
mod watcher;

// Re-export main types for convenience
pub use error::{ReadError, Result, WatchpointError};
pub use filter::IgnoreFilter;
pub use session::{Session, SessionRegistry};
pub use types::*;
