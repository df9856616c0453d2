//! Filesystem conventions: `<id>.data` / `<id>.hint` in a single directory,
//! enumerated in integer id order (not lexicographic).

use std::fs::read_dir;
use std::path::{Path, PathBuf};

use crate::error::NamingError;

pub const DATA_EXT: &str = "data";
pub const HINT_EXT: &str = "hint";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Data,
    Hint,
}

impl SegmentKind {
    pub fn ext(self) -> &'static str {
        match self {
            SegmentKind::Data => DATA_EXT,
            SegmentKind::Hint => HINT_EXT,
        }
    }
}

/// The file name a segment would have, without any directory component.
pub fn base_name(id: u64, kind: SegmentKind) -> String {
    format!("{id}.{}", kind.ext())
}

pub fn segment_path(dir: &Path, id: u64, kind: SegmentKind) -> PathBuf {
    dir.join(base_name(id, kind))
}

/// Parses `<id>.<ext>` back into `(id, kind)`. Returns `None` for anything
/// that isn't a recognized segment file name (other files may legitimately
/// live in the directory and are simply ignored by the engine).
pub fn parse_segment_filename(path: &Path) -> Option<(u64, SegmentKind)> {
    let stem = path.file_stem()?.to_str()?;
    let ext = path.extension()?.to_str()?;
    let id = stem.parse::<u64>().ok()?;
    let kind = match ext {
        DATA_EXT => SegmentKind::Data,
        HINT_EXT => SegmentKind::Hint,
        _ => return None,
    };
    Some((id, kind))
}

fn list_segment_ids(dir: &Path, kind: SegmentKind) -> Result<Vec<u64>, NamingError> {
    let mut ids: Vec<u64> = read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter_map(|path| parse_segment_filename(&path))
        .filter(|(_, k)| *k == kind)
        .map(|(id, _)| id)
        .collect();
    ids.sort_unstable();
    Ok(ids)
}

pub fn list_data_segment_ids(dir: &Path) -> Result<Vec<u64>, NamingError> {
    list_segment_ids(dir, SegmentKind::Data)
}

pub fn list_hint_segment_ids(dir: &Path) -> Result<Vec<u64>, NamingError> {
    list_segment_ids(dir, SegmentKind::Hint)
}

/// `max(existing) + 1`, or `0` when no segments exist yet.
pub fn next_file_id(existing_ids: &[u64]) -> u64 {
    existing_ids.iter().max().map_or(0, |max| max + 1)
}
