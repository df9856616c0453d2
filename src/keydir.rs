//! The in-memory key directory: key -> (segment, offset, size, timestamp).
//!
//! A single lock serializes every operation.

use std::collections::HashMap;

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDirEntry {
    pub segment: String,
    pub entry_size: u32,
    pub entry_offset: u64,
    pub timestamp: u32,
}

#[derive(Default)]
pub struct KeyDir {
    index: Mutex<HashMap<String, KeyDirEntry>>,
}

impl KeyDir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: &str, entry: KeyDirEntry) {
        self.index.lock().insert(key.to_owned(), entry);
    }

    pub fn get(&self, key: &str) -> Option<KeyDirEntry> {
        self.index.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<KeyDirEntry> {
        self.index.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.lock().is_empty()
    }

    /// Drops every entry. Used by a full index rebuild, which repopulates
    /// from scratch by re-scanning segments in id order.
    pub fn clear(&self) {
        self.index.lock().clear();
    }

    /// Swings entries rewritten by a completed merge into the new segment.
    ///
    /// For each `(key, (entry_size, entry_offset, timestamp))` in
    /// `new_entries`: if the directory still has an entry for `key` and its
    /// timestamp matches the merged entry's timestamp, re-point it at
    /// `new_segment` with the merged offset/size. Otherwise leave it alone —
    /// a newer concurrent write must not be clobbered.
    ///
    /// The re-point happens even when the current entry's segment name
    /// already equals `new_segment`: merge rewrites that segment in place at
    /// fresh offsets, so a timestamp match there still means the directory's
    /// offset is stale and must be replaced, not skipped.
    pub fn merge_index(
        &self,
        new_entries: &HashMap<String, (u32, u64, u32)>,
        new_segment: &str,
    ) {
        let mut index = self.index.lock();
        for (key, &(entry_size, entry_offset, timestamp)) in new_entries {
            if let Some(current) = index.get(key) {
                if current.timestamp == timestamp {
                    index.insert(
                        key.clone(),
                        KeyDirEntry {
                            segment: new_segment.to_owned(),
                            entry_size,
                            entry_offset,
                            timestamp,
                        },
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(segment: &str, timestamp: u32) -> KeyDirEntry {
        KeyDirEntry {
            segment: segment.to_owned(),
            entry_size: 10,
            entry_offset: 0,
            timestamp,
        }
    }

    #[test]
    fn add_get_remove_round_trip_test() {
        let dir = KeyDir::new();
        dir.add("k", entry("0.data", 1));
        assert_eq!(dir.get("k").unwrap().segment, "0.data");
        assert_eq!(dir.remove("k").unwrap().timestamp, 1);
        assert!(dir.get("k").is_none());
    }

    #[test]
    fn merge_index_swings_matching_timestamp_test() {
        let dir = KeyDir::new();
        dir.add("k", entry("0.data", 5));

        let mut merged = HashMap::new();
        merged.insert("k".to_string(), (20u32, 100u64, 5u32));
        dir.merge_index(&merged, "3.data");

        let e = dir.get("k").unwrap();
        assert_eq!(e.segment, "3.data");
        assert_eq!(e.entry_offset, 100);
    }

    #[test]
    fn merge_index_skips_newer_concurrent_write_test() {
        let dir = KeyDir::new();
        // A concurrent put landed after the merge's reselection snapshot,
        // bumping the timestamp beyond what the merge captured.
        dir.add("k", entry("1.data", 99));

        let mut merged = HashMap::new();
        merged.insert("k".to_string(), (20u32, 100u64, 5u32));
        dir.merge_index(&merged, "3.data");

        let e = dir.get("k").unwrap();
        assert_eq!(e.segment, "1.data");
        assert_eq!(e.timestamp, 99);
    }

    #[test]
    fn merge_index_skips_absent_key_test() {
        let dir = KeyDir::new();
        let mut merged = HashMap::new();
        merged.insert("ghost".to_string(), (1u32, 0u64, 1u32));
        dir.merge_index(&merged, "3.data");
        assert!(dir.get("ghost").is_none());
    }

    #[test]
    fn merge_index_repoints_even_when_segment_name_already_matches_test() {
        let dir = KeyDir::new();
        // `k` already lives in what will be the merge-target segment (the
        // newest mergeable segment, rewritten in place at a new offset).
        dir.add("k", entry("3.data", 5));
        let mut merged = HashMap::new();
        merged.insert("k".to_string(), (20u32, 100u64, 5u32));
        dir.merge_index(&merged, "3.data");
        // Timestamp still matches, so the stale offset must be replaced even
        // though the segment name didn't change.
        let e = dir.get("k").unwrap();
        assert_eq!(e.segment, "3.data");
        assert_eq!(e.entry_offset, 100);
    }
}
