//! A single on-disk segment file: either a data segment (the canonical log)
//! or a hint segment (its compact, discardable index sidecar).
//!
//! Segments are opened in one of two modes. Writer mode is append-only and
//! serializes its own appends with a per-segment lock; reader mode is
//! positional-read/full-scan only and fails to open if the file is absent.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::codec::{self, DataEntry, HintEntry, DATA_HEADER_SIZE, HINT_HEADER_SIZE};
use crate::error::SegmentError;
use crate::naming::{segment_path, SegmentKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Writer,
    Reader,
}

pub struct Segment {
    id: u64,
    kind: SegmentKind,
    base_name: String,
    mode: Mode,
    file: Mutex<File>,
    size: Mutex<u64>,
}

impl Segment {
    /// Opens (creating if absent) a segment for appending.
    pub fn create_writer(dir: &Path, id: u64, kind: SegmentKind) -> Result<Segment, SegmentError> {
        Self::create_writer_at_path(&segment_path(dir, id, kind), id, kind)
    }

    /// Like `create_writer`, but at an arbitrary path. Used by merge to stage
    /// a compacted segment under a temporary name before it is renamed into
    /// place.
    pub fn create_writer_at_path(
        path: &Path,
        id: u64,
        kind: SegmentKind,
    ) -> Result<Segment, SegmentError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let size = file.metadata()?.len();
        Ok(Segment {
            id,
            kind,
            base_name: base_name(path),
            mode: Mode::Writer,
            file: Mutex::new(file),
            size: Mutex::new(size),
        })
    }

    /// Opens an existing segment read-only. Fails if the file does not exist.
    pub fn open_reader(dir: &Path, id: u64, kind: SegmentKind) -> Result<Segment, SegmentError> {
        let path = segment_path(dir, id, kind);
        if !path.exists() {
            return Err(SegmentError::NotFound(path));
        }
        let file = OpenOptions::new().read(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Segment {
            id,
            kind,
            base_name: base_name(&path),
            mode: Mode::Reader,
            file: Mutex::new(file),
            size: Mutex::new(size),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Consumes the segment, dropping its file handle.
    pub fn close(self) {
        drop(self);
    }

    pub fn current_size(&self) -> u64 {
        *self.size.lock()
    }

    /// Appends a pre-framed record, flushing (and fsyncing, if `fsync` is
    /// set) before returning. Returns the offset the frame was written at.
    pub fn append(&self, frame: &[u8], fsync: bool) -> Result<u64, SegmentError> {
        if self.mode != Mode::Writer {
            return Err(SegmentError::NotWritable);
        }
        let mut file = self.file.lock();
        let mut size = self.size.lock();
        let offset = *size;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(frame)?;
        file.flush()?;
        if fsync {
            file.sync_all()?;
        }
        *size = offset + frame.len() as u64;
        Ok(offset)
    }

    /// Positional read of `size` bytes starting at `offset`.
    pub fn read_at(&self, offset: u64, size: u32) -> Result<Vec<u8>, SegmentError> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; size as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Scans a data segment from the start, yielding each record in physical
    /// order and verifying its checksum as it goes.
    pub fn scan_data(&self) -> Result<Vec<DataEntry>, SegmentError> {
        if self.kind != SegmentKind::Data {
            return Err(SegmentError::NotReadable);
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut offset: u64 = 0;
        loop {
            let mut header_buf = [0u8; DATA_HEADER_SIZE];
            match read_exact_or_eof(&mut file, &mut header_buf)? {
                ReadOutcome::Eof => break,
                ReadOutcome::Partial => break, // truncated trailing record: treat as end-of-stream
                ReadOutcome::Full => {}
            }
            let header = codec::decode_data_header(&header_buf)?;
            let body_len = header.key_len as usize + header.value_len as usize;
            let mut body = vec![0u8; body_len];
            if file.read_exact(&mut body).is_err() {
                break; // truncated trailing record
            }

            let mut frame = Vec::with_capacity(DATA_HEADER_SIZE + body_len);
            frame.extend_from_slice(&header_buf);
            frame.extend_from_slice(&body);
            let (key, value) = codec::verify_data(&frame)?;

            let entry_size = frame.len() as u32;
            entries.push(DataEntry {
                key,
                entry_size,
                entry_offset: offset,
                timestamp: header.timestamp,
                value,
            });
            offset += entry_size as u64;
        }
        Ok(entries)
    }

    /// Scans a hint segment from the start, yielding each sidecar entry.
    pub fn scan_hint(&self) -> Result<Vec<HintEntry>, SegmentError> {
        if self.kind != SegmentKind::Hint {
            return Err(SegmentError::NotReadable);
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        loop {
            let mut header_buf = [0u8; HINT_HEADER_SIZE];
            match read_exact_or_eof(&mut file, &mut header_buf)? {
                ReadOutcome::Eof => break,
                ReadOutcome::Partial => break,
                ReadOutcome::Full => {}
            }
            let header = codec::decode_hint_header(&header_buf)?;
            let mut key_buf = vec![0u8; header.key_len as usize];
            if file.read_exact(&mut key_buf).is_err() {
                break;
            }
            let key = String::from_utf8(key_buf).map_err(|e| {
                crate::error::CodecError::CorruptRecord {
                    reason: format!("invalid utf-8 key in hint segment: {e}"),
                }
            })?;
            entries.push(HintEntry {
                key,
                entry_size: header.entry_size,
                entry_offset: header.entry_offset as u64,
                timestamp: header.timestamp,
            });
        }
        Ok(entries)
    }
}

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

/// Like `read_exact`, but distinguishes a clean EOF (zero bytes read) from a
/// truncated trailing record (some, but not all, bytes available).
fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> Result<ReadOutcome, SegmentError> {
    let mut read_total = 0;
    while read_total < buf.len() {
        let n = file.read(&mut buf[read_total..])?;
        if n == 0 {
            break;
        }
        read_total += n;
    }
    if read_total == 0 {
        Ok(ReadOutcome::Eof)
    } else if read_total < buf.len() {
        Ok(ReadOutcome::Partial)
    } else {
        Ok(ReadOutcome::Full)
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_read_at_test() -> Result<(), SegmentError> {
        let dir = tempdir().unwrap();
        let seg = Segment::create_writer(dir.path(), 0, SegmentKind::Data)?;

        let frame = codec::encode_data(100, "k", "v");
        let offset = seg.append(&frame, false)?;
        assert_eq!(offset, 0);
        assert_eq!(seg.current_size(), frame.len() as u64);

        let read_back = seg.read_at(offset, frame.len() as u32)?;
        assert_eq!(read_back, frame);
        Ok(())
    }

    #[test]
    fn reader_mode_fails_on_missing_file_test() {
        let dir = tempdir().unwrap();
        let result = Segment::open_reader(dir.path(), 9, SegmentKind::Data);
        assert!(matches!(result, Err(SegmentError::NotFound(_))));
    }

    #[test]
    fn writer_append_rejected_in_reader_mode_test() -> Result<(), SegmentError> {
        let dir = tempdir().unwrap();
        Segment::create_writer(dir.path(), 0, SegmentKind::Data)?.append(
            &codec::encode_data(1, "a", "b"),
            false,
        )?;
        let reader = Segment::open_reader(dir.path(), 0, SegmentKind::Data)?;
        let result = reader.append(&codec::encode_data(2, "c", "d"), false);
        assert!(matches!(result, Err(SegmentError::NotWritable)));
        Ok(())
    }

    #[test]
    fn scan_data_yields_records_in_physical_order_test() -> Result<(), SegmentError> {
        let dir = tempdir().unwrap();
        let seg = Segment::create_writer(dir.path(), 0, SegmentKind::Data)?;
        seg.append(&codec::encode_data(1, "a", "1"), false)?;
        seg.append(&codec::encode_data(2, "b", "2"), false)?;
        seg.append(&codec::encode_data(3, "a", "3"), false)?;

        let entries = seg.scan_data()?;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].key, "a");
        assert_eq!(entries[0].value, "1");
        assert_eq!(entries[2].value, "3");
        Ok(())
    }

    #[test]
    fn scan_data_detects_checksum_corruption_test() -> Result<(), SegmentError> {
        let dir = tempdir().unwrap();
        let seg = Segment::create_writer(dir.path(), 0, SegmentKind::Data)?;
        seg.append(&codec::encode_data(1, "a", "value"), false)?;
        drop(seg);

        let path = segment_path(dir.path(), 0, SegmentKind::Data);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let reopened = Segment::open_reader(dir.path(), 0, SegmentKind::Data)?;
        let result = reopened.scan_data();
        assert!(matches!(result, Err(SegmentError::Codec(_))));
        Ok(())
    }

    #[test]
    fn scan_data_stops_at_truncated_trailing_record_test() -> Result<(), SegmentError> {
        let dir = tempdir().unwrap();
        let seg = Segment::create_writer(dir.path(), 0, SegmentKind::Data)?;
        seg.append(&codec::encode_data(1, "a", "1"), false)?;
        let good_len = seg.current_size();
        seg.append(&codec::encode_data(2, "b", "2"), false)?;
        drop(seg);

        let path = segment_path(dir.path(), 0, SegmentKind::Data);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 1); // chop the last byte of the second record
        std::fs::write(&path, bytes).unwrap();

        let reopened = Segment::open_reader(dir.path(), 0, SegmentKind::Data)?;
        let entries = reopened.scan_data()?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_size as u64, good_len);
        Ok(())
    }

    #[test]
    fn hint_scan_round_trips_test() -> Result<(), SegmentError> {
        let dir = tempdir().unwrap();
        let seg = Segment::create_writer(dir.path(), 0, SegmentKind::Hint)?;
        seg.append(&codec::encode_hint(10, "a", 0, 20), false)?;
        seg.append(&codec::encode_hint(20, "b", 20, 24), false)?;

        let entries = seg.scan_hint()?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "a");
        assert_eq!(entries[1].entry_offset, 20);
        Ok(())
    }
}
