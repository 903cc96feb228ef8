//! OS event intake and debouncing
//!
//! One [`WatchTask`] exists per active watch. The `notify` backend delivers
//! raw events on its own thread; the intake handler does nothing but gate on
//! the intake flag, normalize paths under the watch root, insert them into
//! the pending set, and push the debounce deadline out. A single worker
//! thread per watch snapshots the pending set when the deadline fires (or a
//! flush is requested) and runs the change processor over the batch.
//!
//! The pending set is a set, not a queue: repeated events for one path
//! within a debounce window collapse to a single processor run. Because one
//! worker drives all processing for a watch, batches are fully drained in
//! the order their timers fired, which is what keeps log appends serialized
//! across batches.

use crate::error::{Result, WatchpointError};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// Callback that processes one changed path; supplied by the monitor
pub(crate) type PathProcessor = Arc<dyn Fn(&Path) + Send + Sync>;

struct QueueState {
    pending: HashSet<PathBuf>,
    deadline: Option<Instant>,
    flush: bool,
    shutdown: bool,
    processing: bool,
}

/// Pending-paths set plus debounce timer shared between intake and worker
pub(crate) struct DebounceQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl DebounceQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: HashSet::new(),
                deadline: None,
                flush: false,
                shutdown: false,
                processing: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Insert a path and reset the debounce timer
    fn enqueue(&self, path: PathBuf, debounce: Duration) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        trace!("Pending change: {:?}", path);
        state.pending.insert(path);
        state.deadline = Some(Instant::now() + debounce);
        self.cond.notify_all();
    }

    /// Fire the timer immediately and wait until every path pending at the
    /// time of the call has been processed.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return;
            }
            if state.pending.is_empty() && !state.processing {
                return;
            }
            state.flush = true;
            self.cond.notify_all();
            self.cond.wait(&mut state);
        }
    }

    /// Cancel the timer and discard pending paths; the worker exits after
    /// finishing any batch it is currently processing.
    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        state.pending.clear();
        state.deadline = None;
        self.cond.notify_all();
    }

    /// Worker side: block until a batch is due, then take it.
    /// Returns `None` on shutdown.
    fn next_batch(&self) -> Option<Vec<PathBuf>> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if !state.pending.is_empty() {
                let due = state
                    .deadline
                    .map_or(true, |d| Instant::now() >= d);
                if due || state.flush {
                    state.deadline = None;
                    state.flush = false;
                    state.processing = true;
                    return Some(state.pending.drain().collect());
                }
            } else if state.flush {
                // Nothing was pending; release any flush waiters.
                state.flush = false;
                self.cond.notify_all();
            }
            match state.deadline {
                Some(deadline) => {
                    self.cond.wait_until(&mut state, deadline);
                }
                None => {
                    self.cond.wait(&mut state);
                }
            }
        }
    }

    fn batch_done(&self) {
        let mut state = self.state.lock();
        state.processing = false;
        self.cond.notify_all();
    }
}

/// An established OS watch with its debounce worker
pub(crate) struct WatchTask {
    root: PathBuf,
    queue: Arc<DebounceQueue>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WatchTask {
    /// Establish the OS watch and spawn the debounce worker.
    ///
    /// `intake` gates event acceptance: events delivered while it is false
    /// are discarded at the door. `processor` is invoked once per path per
    /// batch, on the worker thread only.
    pub fn spawn(
        root: PathBuf,
        recursive: bool,
        debounce: Duration,
        intake: Arc<AtomicBool>,
        processor: PathProcessor,
    ) -> Result<Self> {
        let queue = Arc::new(DebounceQueue::new());

        let intake_cb = Arc::clone(&intake);
        let queue_cb = Arc::clone(&queue);
        let root_cb = root.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if !intake_cb.load(Ordering::Acquire) {
                        return;
                    }
                    let relevant = matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    );
                    if !relevant {
                        return;
                    }
                    for path in event.paths {
                        if path.starts_with(&root_cb) {
                            queue_cb.enqueue(path, debounce);
                        }
                    }
                }
                Err(e) => {
                    error!("Watch error: {}", e);
                }
            }
        })?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&root, mode)?;
        info!("Watching {:?}", root);

        // The watch is established; events accumulate in the pending set
        // until the worker comes up.
        let worker_queue = Arc::clone(&queue);
        let worker = std::thread::Builder::new()
            .name("watchpoint-worker".to_string())
            .spawn(move || {
                while let Some(batch) = worker_queue.next_batch() {
                    let mut paths = batch;
                    paths.sort();
                    // Process vanished paths first so a rename's deletion is
                    // on the log before its reappearance is classified.
                    paths.sort_by_key(|p| p.exists());
                    debug!("Processing batch of {} paths", paths.len());
                    for path in &paths {
                        processor(path);
                    }
                    worker_queue.batch_done();
                }
            })
            .map_err(|e| WatchpointError::internal(format!("worker spawn failed: {}", e)))?;

        Ok(Self {
            root,
            queue,
            watcher: Mutex::new(Some(watcher)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Root directory this watch observes
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Force the debounce timer and wait for the pending set to drain
    pub fn flush(&self) {
        self.queue.flush();
    }

    /// Close the OS watch, cancel the timer, discard pending paths, and
    /// wait for any in-flight batch to complete.
    pub fn shutdown(&self) {
        if let Some(mut watcher) = self.watcher.lock().take() {
            if let Err(e) = watcher.unwatch(&self.root) {
                debug!("Unwatch failed for {:?}: {}", self.root, e);
            }
        }
        self.queue.shutdown();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
        info!("Stopped watching {:?}", self.root);
    }
}

impl Drop for WatchTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}
