//! End-to-end scenarios for Watchpoint
//!
//! Drives real OS watches through the public facade: filesystem mutations
//! are made on disk, the debounce flush is the synchronization point, and
//! every expectation is checked against the public query surface.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use watchpoint::*;

/// Interval long enough for the OS watch backend to deliver events before
/// a flush forces them through the processor.
const SETTLE: Duration = Duration::from_millis(500);

/// Test harness owning one registry, one session, and one watched root
pub struct WatchpointTestHarness {
    pub temp_dir: TempDir,
    pub registry: SessionRegistry,
    pub id: String,
}

impl WatchpointTestHarness {
    /// Create a harness over an empty directory and start watching it
    pub fn new() -> Self {
        Self::with_seed(&[])
    }

    /// Create a harness whose root holds `seed` files before the watch
    /// starts, so they are prepopulated into the cache.
    pub fn with_seed(seed: &[(&str, &str)]) -> Self {
        let temp_dir = TempDir::new().unwrap();
        for (rel, content) in seed {
            let path = temp_dir.path().join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }

        let registry = SessionRegistry::new();
        registry.setup(MonitorConfig::default().with_debounce_ms(50));
        let session = registry.create_session(CreateSessionOptions::default());
        let id = session.id().to_string();

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        registry
            .start(
                &id,
                Some(temp_dir.path()),
                StartOptions {
                    on_ready: Some(Box::new(move |stats| {
                        ready_tx.send(stats).ok();
                    })),
                    ..StartOptions::default()
                },
            )
            .expect("watch must start");
        let stats = ready_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("prepopulation must complete");
        assert_eq!(stats.files_cached, seed.len());

        Self {
            temp_dir,
            registry,
            id,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn abs(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn write(&self, rel: &str, content: &str) {
        fs::write(self.abs(rel), content).unwrap();
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.abs(rel)).unwrap();
    }

    pub fn rename(&self, from: &str, to: &str) {
        fs::rename(self.abs(from), self.abs(to)).unwrap();
    }

    /// Let the OS deliver outstanding events, then force the debounce
    /// timer and wait for processing to finish.
    pub fn settle(&self) -> Vec<Change> {
        std::thread::sleep(SETTLE);
        self.registry
            .flush_pending_and_get_changes(&self.id)
            .expect("session exists")
    }

    pub fn checkpoint(&self, label: &str) -> Checkpoint {
        self.registry
            .create_checkpoint(&self.id, Some(label.to_string()))
            .expect("session exists")
    }
}

impl Drop for WatchpointTestHarness {
    fn drop(&mut self) {
        self.registry.destroy(&self.id);
    }
}

#[test]
fn s1_create_then_modify() {
    let h = WatchpointTestHarness::new();

    h.write("a.txt", "hello");
    h.settle();
    h.write("a.txt", "hello world");
    let changes = h.settle();

    assert_eq!(changes.len(), 2, "log: {:?}", kinds(&changes));
    assert_eq!(changes[0].kind, ChangeKind::Created);
    assert_eq!(changes[0].path, "a.txt");
    assert_eq!(changes[0].new_content.as_deref(), Some(b"hello".as_slice()));
    assert_eq!(changes[1].kind, ChangeKind::Modified);
    assert_eq!(changes[1].old_content.as_deref(), Some(b"hello".as_slice()));
    assert_eq!(
        changes[1].new_content.as_deref(),
        Some(b"hello world".as_slice())
    );
}

#[test]
fn s2_rename_detected_by_inode() {
    let h = WatchpointTestHarness::with_seed(&[("x.txt", "X")]);

    h.rename("x.txt", "y.txt");
    let changes = h.settle();

    assert_eq!(changes.len(), 1, "log: {:?}", kinds(&changes));
    let renamed = &changes[0];
    assert_eq!(renamed.kind, ChangeKind::Renamed);
    assert_eq!(renamed.path, "y.txt");
    assert_eq!(renamed.meta.old_path(), Some("x.txt"));
    assert_eq!(renamed.old_content.as_deref(), Some(b"X".as_slice()));
    assert_eq!(renamed.new_content.as_deref(), Some(b"X".as_slice()));
    assert!(!changes.iter().any(|c| c.kind == ChangeKind::Deleted));
}

#[test]
fn s3_transient_file() {
    let h = WatchpointTestHarness::new();

    h.write("t.txt", "tmp");
    h.settle();
    h.remove("t.txt");
    h.settle();

    let result = h
        .registry
        .revert_to_original(&h.id)
        .expect("history to revert");

    assert!(!h.abs("t.txt").exists());
    assert!(result.new_changes.is_empty());
    assert_eq!(result.reverted_count, 2);
    assert!(result.is_full_revert);
    assert!(h.registry.get_changes(&h.id).is_empty());
}

#[test]
fn s4_checkpointed_partial_revert() {
    let h = WatchpointTestHarness::new();

    h.write("file.txt", "v1");
    h.settle();
    h.checkpoint("cp1");
    h.write("file.txt", "v2");
    h.settle();
    h.checkpoint("cp2");

    let result = h
        .registry
        .revert_to_checkpoint(&h.id, 1)
        .expect("changes after cp1");

    assert_eq!(fs::read(h.abs("file.txt")).unwrap(), b"v1");
    assert_eq!(result.new_changes.len(), 1);
    assert_eq!(result.new_changes[0].kind, ChangeKind::Created);

    let checkpoints = h.registry.get_checkpoints(&h.id);
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].label.as_deref(), Some("cp1"));
}

#[test]
fn s5_multi_file_revert() {
    let h = WatchpointTestHarness::with_seed(&[("a.txt", "A"), ("b.txt", "B")]);

    h.write("c.txt", "C");
    h.write("a.txt", "A2");
    h.remove("b.txt");
    let changes = h.settle();
    assert_eq!(changes.len(), 3, "log: {:?}", kinds(&changes));

    let result = h
        .registry
        .revert_to_original(&h.id)
        .expect("history to revert");

    assert_eq!(fs::read(h.abs("a.txt")).unwrap(), b"A");
    assert_eq!(fs::read(h.abs("b.txt")).unwrap(), b"B");
    assert!(!h.abs("c.txt").exists());
    assert_eq!(result.reverted_count, 3);
    assert_eq!(result.error_count, 0);
    assert!(h.registry.get_changes(&h.id).is_empty());
}

#[test]
fn s6_duplicate_coalescing() {
    let h = WatchpointTestHarness::new();

    for _ in 0..3 {
        h.write("f.txt", "x");
        std::thread::sleep(Duration::from_millis(30));
    }
    let changes = h.settle();

    let created: Vec<_> = changes
        .iter()
        .filter(|c| c.kind == ChangeKind::Created)
        .collect();
    assert_eq!(created.len(), 1, "log: {:?}", kinds(&changes));
    assert!(changes.len() <= 2, "log: {:?}", kinds(&changes));
}

#[test]
fn stats_reflect_history() {
    let h = WatchpointTestHarness::new();

    h.write("one.txt", "1");
    h.settle();
    h.write("one.txt", "2");
    h.settle();

    let stats = h.registry.get_stats(&h.id).unwrap();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.modified, 1);
    assert_eq!(stats.active_watches, 1);
}

#[test]
fn tagging_annotates_a_turn() {
    let h = WatchpointTestHarness::new();

    h.write("src.rs", "fn a() {}");
    let changes = h.settle();
    let start = changes.first().unwrap().timestamp;
    let end = changes.last().unwrap().timestamp;

    let tagged = h.registry.tag_changes(
        &h.id,
        start,
        end,
        "write_tool",
        &ToolArgs {
            filepath: Some("src.rs".to_string()),
        },
    );
    assert_eq!(tagged, 1);

    let changes = h.registry.get_changes(&h.id);
    assert_eq!(changes[0].attribution, Some(Attribution::Confirmed));
    assert!(changes[0].tools.contains(&"write_tool".to_string()));
}

fn kinds(changes: &[Change]) -> Vec<String> {
    changes
        .iter()
        .map(|c| format!("{} {}", c.kind, c.path))
        .collect()
}
