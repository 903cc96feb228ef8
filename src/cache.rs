//! Byte-bounded LRU content cache
//!
//! Maps root-relative paths to their last observed content together with the
//! `(device, inode)` stat captured at read time. The cache is the monitor's
//! belief about what exists on disk: an entry for path `p` means "`p` exists
//! with this content as far as we know", and absence means "no such file".
//!
//! Eviction is purely size-driven (no entry-count cap) and strictly LRU by
//! access order: `get` promotes, and `set` on an existing key updates it in
//! place at the most-recently-used position. Values larger than the ceiling
//! are rejected silently; the caller proceeds with the file effectively
//! unobserved and it will be diffed from empty on its next event.

use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// One cached observation of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CacheEntry {
    /// File content as last read
    pub content: Vec<u8>,
    /// Device id from the stat at read time
    pub device: u64,
    /// Inode from the stat at read time
    pub inode: u64,
}

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

/// Path → content store with strict LRU eviction by total byte size
pub(crate) struct ContentCache {
    max_bytes: u64,
    total_bytes: u64,
    slots: HashMap<String, Slot>,
    /// Access order: tick → path; the smallest tick is the LRU entry
    order: BTreeMap<u64, String>,
    next_tick: u64,
}

impl ContentCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            total_bytes: 0,
            slots: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
        }
    }

    fn touch(&mut self, path: &str) {
        if let Some(slot) = self.slots.get_mut(path) {
            self.order.remove(&slot.tick);
            slot.tick = self.next_tick;
            self.order.insert(self.next_tick, path.to_string());
            self.next_tick += 1;
        }
    }

    /// Look up a path, promoting it to most-recently-used
    pub fn get(&mut self, path: &str) -> Option<&CacheEntry> {
        if self.slots.contains_key(path) {
            self.touch(path);
        }
        self.slots.get(path).map(|s| &s.entry)
    }

    /// Whether the monitor currently believes this path exists
    pub fn contains(&self, path: &str) -> bool {
        self.slots.contains_key(path)
    }

    /// Insert or update an entry at the most-recently-used position
    ///
    /// Oversize values are rejected without error. After insertion, the
    /// least-recently-used entries are evicted until the byte total fits.
    pub fn set(&mut self, path: &str, entry: CacheEntry) {
        let len = entry.content.len() as u64;
        if len > self.max_bytes {
            trace!(
                "Rejecting oversize cache value for {} ({} > {} bytes)",
                path,
                len,
                self.max_bytes
            );
            return;
        }

        if let Some(slot) = self.slots.get_mut(path) {
            self.total_bytes -= slot.entry.content.len() as u64;
            self.total_bytes += len;
            slot.entry = entry;
            self.touch(path);
        } else {
            self.slots.insert(
                path.to_string(),
                Slot {
                    entry,
                    tick: self.next_tick,
                },
            );
            self.order.insert(self.next_tick, path.to_string());
            self.next_tick += 1;
            self.total_bytes += len;
        }

        while self.total_bytes > self.max_bytes {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            if let Some(slot) = self.slots.remove(&oldest) {
                self.total_bytes -= slot.entry.content.len() as u64;
                trace!("Evicted {} from content cache", oldest);
            }
        }
    }

    /// Remove an entry, returning it if present
    pub fn remove(&mut self, path: &str) -> Option<CacheEntry> {
        let slot = self.slots.remove(path)?;
        self.order.remove(&slot.tick);
        self.total_bytes -= slot.entry.content.len() as u64;
        Some(slot.entry)
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.slots.clear();
        self.order.clear();
        self.total_bytes = 0;
    }

    /// Total byte size of all cached values
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.slots.len()
    }
}
