use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("corrupt record: {reason}")]
    CorruptRecord { reason: String },
}

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("segment file not found: {0}")]
    NotFound(PathBuf),

    #[error("segment is not open for writing")]
    NotWritable,

    #[error("segment is not open for reading")]
    NotReadable,

    #[error("codec error")]
    Codec(#[from] CodecError),

    #[error("IO error")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum NamingError {
    #[error("IO error")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("key exceeds max size (expected < {})", u32::MAX)]
    KeyExceedsMaxSize,

    #[error("value exceeds max size (expected < {})", u32::MAX)]
    ValueExceedsMaxSize,

    #[error("data segment {segment} has no hint file and is not the tail segment")]
    MissingHintForNonTailSegment { segment: String },

    #[error("no active writer segment")]
    NoActiveSegment,

    #[error("segment error")]
    Segment(#[from] SegmentError),

    #[error("codec error")]
    Codec(#[from] CodecError),

    #[error("naming error")]
    Naming(#[from] NamingError),

    #[error("IO error")]
    Io(#[from] io::Error),
}
