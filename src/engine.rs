//! The storage engine: owns the segment set, the active writer segment, and
//! the read-only segments; performs `store`/`retrieve`/`delete`, rotation on
//! size threshold, full index rebuild at startup, and merge.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::ReentrantMutex;

use crate::codec::{self, DATA_HEADER_SIZE};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::keydir::{KeyDir, KeyDirEntry};
use crate::naming::{self, SegmentKind};
use crate::segment::Segment;
use crate::TOMBSTONE;

/// Minimum number of non-active segments merge requires before it bothers
/// doing any work (spec: "fewer than a small threshold... e.g. fewer than 2").
const MIN_MERGEABLE_SEGMENTS: usize = 2;

struct EngineState {
    next_id: u64,
    /// All currently-readable data segments, keyed by base file name. This
    /// includes the active writer segment (it is its own read source).
    segments: HashMap<String, Segment>,
    active_id: Option<u64>,
    active_hint: Option<Segment>,
    merge_running: bool,
}

pub struct Engine {
    config: EngineConfig,
    keydir: KeyDir,
    lock: ReentrantMutex<RefCell<EngineState>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub segments_before: usize,
    pub segments_after: usize,
    pub ran: bool,
}

struct MergeRunningGuard<'a> {
    engine: &'a Engine,
}

impl<'a> Drop for MergeRunningGuard<'a> {
    fn drop(&mut self) {
        let guard = self.engine.lock.lock();
        guard.borrow_mut().merge_running = false;
    }
}

fn now_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as u32
}

impl Engine {
    /// Opens (creating if absent) the store directory and rebuilds the
    /// in-memory index from whatever segments are already there.
    pub fn open(config: EngineConfig) -> Result<Engine, EngineError> {
        fs::create_dir_all(&config.dir)?;
        let engine = Engine {
            config,
            keydir: KeyDir::new(),
            lock: ReentrantMutex::new(RefCell::new(EngineState {
                next_id: 0,
                segments: HashMap::new(),
                active_id: None,
                active_hint: None,
                merge_running: false,
            })),
        };
        engine.rebuild_index()?;
        Ok(engine)
    }

    /// Re-scans the store directory from scratch, discarding whatever is
    /// currently in memory. Called once by `open`; exposed for an embedder
    /// that wants to force a rescan (e.g. after dropping segment files in
    /// from elsewhere).
    pub fn rebuild_index(&self) -> Result<(), EngineError> {
        let guard = self.lock.lock();
        {
            let mut state = guard.borrow_mut();
            state.segments.clear();
            state.active_id = None;
            state.active_hint = None;
        }
        self.keydir.clear();

        let data_ids = naming::list_data_segment_ids(&self.config.dir)?;
        let hint_ids: HashSet<u64> = naming::list_hint_segment_ids(&self.config.dir)?
            .into_iter()
            .collect();
        let max_id = data_ids.iter().copied().max();

        for id in data_ids.iter().copied() {
            let data_seg = Segment::open_reader(&self.config.dir, id, SegmentKind::Data)?;
            let base = data_seg.base_name().to_string();

            if hint_ids.contains(&id) {
                let hint_seg = Segment::open_reader(&self.config.dir, id, SegmentKind::Hint)?;
                for e in hint_seg.scan_hint()? {
                    self.keydir.add(
                        &e.key,
                        KeyDirEntry {
                            segment: base.clone(),
                            entry_size: e.entry_size,
                            entry_offset: e.entry_offset,
                            timestamp: e.timestamp,
                        },
                    );
                }
            } else {
                if Some(id) != max_id {
                    return Err(EngineError::MissingHintForNonTailSegment { segment: base });
                }
                for e in data_seg.scan_data()? {
                    self.keydir.add(
                        &e.key,
                        KeyDirEntry {
                            segment: base.clone(),
                            entry_size: e.entry_size,
                            entry_offset: e.entry_offset,
                            timestamp: e.timestamp,
                        },
                    );
                }
            }

            let mut state = guard.borrow_mut();
            state.segments.insert(base, data_seg);
        }

        guard.borrow_mut().next_id = naming::next_file_id(&data_ids);
        log::debug!(
            "rebuilt index: {} data segment(s), {} key(s)",
            data_ids.len(),
            self.keydir.len()
        );
        Ok(())
    }

    pub fn store(&self, key: &str, value: &str) -> Result<(), EngineError> {
        if key.len() as u64 > u32::MAX as u64 {
            return Err(EngineError::KeyExceedsMaxSize);
        }
        if value.len() as u64 > u32::MAX as u64 {
            return Err(EngineError::ValueExceedsMaxSize);
        }
        let required = DATA_HEADER_SIZE as u64 + key.len() as u64 + value.len() as u64;

        let guard = self.lock.lock();
        {
            let mut state = guard.borrow_mut();
            if state.active_id.is_none() {
                self.open_new_active(&mut state)?;
            } else {
                let active_name = naming::base_name(state.active_id.unwrap(), SegmentKind::Data);
                let size = state
                    .segments
                    .get(&active_name)
                    .ok_or(EngineError::NoActiveSegment)?
                    .current_size();
                if size + required > self.config.max_file_size {
                    self.rotate(&mut state)?;
                }
            }
        }

        let timestamp = now_seconds();
        let (offset, entry_size, segment_name) = {
            let state = guard.borrow();
            let active_id = state.active_id.ok_or(EngineError::NoActiveSegment)?;
            let active_name = naming::base_name(active_id, SegmentKind::Data);
            let active_data = state
                .segments
                .get(&active_name)
                .ok_or(EngineError::NoActiveSegment)?;
            let active_hint = state.active_hint.as_ref().ok_or(EngineError::NoActiveSegment)?;

            let frame = codec::encode_data(timestamp, key, value);
            let offset = active_data.append(&frame, self.config.fsync)?;
            let entry_size = frame.len() as u32;
            let hint_frame = codec::encode_hint(timestamp, key, offset, entry_size);
            active_hint.append(&hint_frame, self.config.fsync)?;

            (offset, entry_size, active_data.base_name().to_string())
        };

        self.keydir.add(
            key,
            KeyDirEntry {
                segment: segment_name,
                entry_size,
                entry_offset: offset,
                timestamp,
            },
        );
        log::debug!("stored key={key:?} offset={offset} size={entry_size}");
        Ok(())
    }

    pub fn retrieve(&self, key: &str) -> Result<Option<String>, EngineError> {
        let guard = self.lock.lock();
        let entry = match self.keydir.get(key) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let state = guard.borrow();
        let segment = state
            .segments
            .get(&entry.segment)
            .ok_or(EngineError::NoActiveSegment)?;
        let frame = segment.read_at(entry.entry_offset, entry.entry_size)?;
        let (_, value) = codec::verify_data(&frame)?;
        log::debug!("retrieved key={key:?} from segment={}", entry.segment);

        if value == TOMBSTONE {
            return Ok(None);
        }
        Ok(Some(value))
    }

    pub fn delete(&self, key: &str) -> Result<bool, EngineError> {
        let _guard = self.lock.lock();
        if self.keydir.get(key).is_none() {
            return Ok(false);
        }
        self.store(key, TOMBSTONE)?;
        self.keydir.remove(key);
        log::debug!("deleted key={key:?}");
        Ok(true)
    }

    pub fn segment_count(&self) -> usize {
        let guard = self.lock.lock();
        guard.borrow().segments.len()
    }

    /// Allocates a brand-new active data+hint segment pair at `next_id`.
    fn open_new_active(&self, state: &mut EngineState) -> Result<(), EngineError> {
        let id = state.next_id;
        state.next_id += 1;
        let data = Segment::create_writer(&self.config.dir, id, SegmentKind::Data)?;
        let hint = Segment::create_writer(&self.config.dir, id, SegmentKind::Hint)?;
        log::trace!("opened new active segment id={id}");
        state.segments.insert(data.base_name().to_string(), data);
        state.active_hint = Some(hint);
        state.active_id = Some(id);
        Ok(())
    }

    /// Seals the current active segment (closes it, reopens it read-only)
    /// and opens a fresh active segment at the next id.
    fn rotate(&self, state: &mut EngineState) -> Result<(), EngineError> {
        let old_id = state.active_id.take().ok_or(EngineError::NoActiveSegment)?;
        state.active_hint = None; // closes the old active hint's writer handle

        let old_name = naming::base_name(old_id, SegmentKind::Data);
        state.segments.remove(&old_name); // drop closes the old writer handle
        let reopened = Segment::open_reader(&self.config.dir, old_id, SegmentKind::Data)?;
        state.segments.insert(old_name, reopened);

        log::trace!("rotated out segment id={old_id}");
        self.open_new_active(state)
    }

    /// Rewrites the read-only segments into a single compacted segment and
    /// publishes it atomically. A no-op if a merge is already running or
    /// there are fewer than `MIN_MERGEABLE_SEGMENTS` eligible segments.
    pub fn merge(&self) -> Result<MergeOutcome, EngineError> {
        let (mergeable_ids, segments_before) = {
            let guard = self.lock.lock();
            let mut state = guard.borrow_mut();
            let total = state.segments.len();

            if state.merge_running {
                return Ok(MergeOutcome {
                    segments_before: total,
                    segments_after: total,
                    ran: false,
                });
            }
            state.merge_running = true;

            let mut ids: Vec<u64> = state
                .segments
                .values()
                .map(|s| s.id())
                .filter(|id| Some(*id) != state.active_id)
                .collect();
            ids.sort_unstable();

            if ids.len() < MIN_MERGEABLE_SEGMENTS {
                state.merge_running = false;
                return Ok(MergeOutcome {
                    segments_before: total,
                    segments_after: total,
                    ran: false,
                });
            }
            (ids, total)
        };

        let _release = MergeRunningGuard { engine: self };
        log::debug!("merge starting over {} segment(s)", mergeable_ids.len());

        // Step 2: latest-value selection, outside the engine lock. Iterate
        // segments in reverse id order so a key's first settled value comes
        // from the newest segment that wrote it. Within a single segment,
        // `scan_data` yields records oldest-to-newest by offset, so a key
        // repeated in the same segment must be resolved to its *last*
        // occurrence there before it competes against other segments.
        let mut latest: HashMap<String, (u32, String)> = HashMap::new();
        for &id in mergeable_ids.iter().rev() {
            let scan_segment = Segment::open_reader(&self.config.dir, id, SegmentKind::Data)?;
            let mut within_segment: HashMap<String, (u32, String)> = HashMap::new();
            for entry in scan_segment.scan_data()? {
                within_segment.insert(entry.key, (entry.timestamp, entry.value));
            }
            for (key, value) in within_segment {
                latest.entry(key).or_insert(value);
            }
        }

        let merge_id = *mergeable_ids.iter().max().expect("checked non-empty above");

        // Step 3: write the compacted segment under a temporary name in the
        // same directory, so the final rename is same-filesystem atomic.
        let tmp_data_path = self.config.dir.join(format!("{merge_id}.data.merging"));
        let tmp_hint_path = self.config.dir.join(format!("{merge_id}.hint.merging"));
        let new_data = Segment::create_writer_at_path(&tmp_data_path, merge_id, SegmentKind::Data)?;
        let new_hint = Segment::create_writer_at_path(&tmp_hint_path, merge_id, SegmentKind::Hint)?;

        let mut merged_index: HashMap<String, (u32, u64, u32)> = HashMap::new();
        for (key, (timestamp, value)) in latest.iter() {
            let frame = codec::encode_data(*timestamp, key, value);
            let offset = new_data.append(&frame, self.config.fsync)?;
            let entry_size = frame.len() as u32;
            let hint_frame = codec::encode_hint(*timestamp, key, offset, entry_size);
            new_hint.append(&hint_frame, self.config.fsync)?;
            merged_index.insert(key.clone(), (entry_size, offset, *timestamp));
        }
        new_data.close();
        new_hint.close();

        // Step 4: publish, under the engine lock.
        let final_data_path = naming::segment_path(&self.config.dir, merge_id, SegmentKind::Data);
        let final_hint_path = naming::segment_path(&self.config.dir, merge_id, SegmentKind::Hint);

        let guard = self.lock.lock();
        let segments_after = {
            let mut state = guard.borrow_mut();

            fs::rename(&tmp_data_path, &final_data_path)?;
            fs::rename(&tmp_hint_path, &final_hint_path)?;

            for &id in &mergeable_ids {
                if id == merge_id {
                    continue;
                }
                let name = naming::base_name(id, SegmentKind::Data);
                state.segments.remove(&name);
                let _ = fs::remove_file(naming::segment_path(&self.config.dir, id, SegmentKind::Data));
                let _ = fs::remove_file(naming::segment_path(&self.config.dir, id, SegmentKind::Hint));
            }

            let merge_name = naming::base_name(merge_id, SegmentKind::Data);
            state.segments.remove(&merge_name);
            let reopened = Segment::open_reader(&self.config.dir, merge_id, SegmentKind::Data)?;
            state.segments.insert(merge_name, reopened);

            state.segments.len()
        };
        drop(guard);

        self.keydir.merge_index(&merged_index, &naming::base_name(merge_id, SegmentKind::Data));

        log::debug!(
            "merge finished: {segments_before} -> {segments_after} segment(s), id={merge_id}"
        );
        Ok(MergeOutcome {
            segments_before,
            segments_after,
            ran: true,
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dir", &self.config.dir)
            .field("segment_count", &self.segment_count())
            .finish()
    }
}
