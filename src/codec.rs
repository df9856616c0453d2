//! Wire framing for data records and hint records, and their CRC discipline.
//!
//! Both record kinds share a 16-byte big-endian header. Data records carry a
//! CRC-32 over everything after the CRC field; hint records carry none (a
//! hint file is a discardable, reconstructable sidecar).

use crate::error::CodecError;

pub const DATA_HEADER_SIZE: usize = 16;
pub const HINT_HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub crc: u32,
    pub timestamp: u32,
    pub key_len: u32,
    pub value_len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HintHeader {
    pub timestamp: u32,
    pub key_len: u32,
    pub entry_size: u32,
    pub entry_offset: u32,
}

pub struct DataEntry {
    pub key: String,
    pub entry_size: u32,
    pub entry_offset: u64,
    pub timestamp: u32,
    pub value: String,
}

pub struct HintEntry {
    pub key: String,
    pub entry_size: u32,
    pub entry_offset: u64,
    pub timestamp: u32,
}

fn checksum(timestamp: u32, key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&timestamp.to_be_bytes());
    hasher.update(&(key.len() as u32).to_be_bytes());
    hasher.update(&(value.len() as u32).to_be_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Builds the full framed data record: `crc | timestamp | key_len | value_len | key | value`.
pub fn encode_data(timestamp: u32, key: &str, value: &str) -> Vec<u8> {
    let key = key.as_bytes();
    let value = value.as_bytes();
    let crc = checksum(timestamp, key, value);

    let mut frame = Vec::with_capacity(DATA_HEADER_SIZE + key.len() + value.len());
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.extend_from_slice(&timestamp.to_be_bytes());
    frame.extend_from_slice(&(key.len() as u32).to_be_bytes());
    frame.extend_from_slice(&(value.len() as u32).to_be_bytes());
    frame.extend_from_slice(key);
    frame.extend_from_slice(value);
    frame
}

pub fn decode_data_header(bytes: &[u8]) -> Result<DataHeader, CodecError> {
    if bytes.len() < DATA_HEADER_SIZE {
        return Err(CodecError::CorruptRecord {
            reason: format!(
                "data header truncated: got {} bytes, need {}",
                bytes.len(),
                DATA_HEADER_SIZE
            ),
        });
    }
    Ok(DataHeader {
        crc: u32::from_be_bytes(bytes[0..4].try_into().unwrap()),
        timestamp: u32::from_be_bytes(bytes[4..8].try_into().unwrap()),
        key_len: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
        value_len: u32::from_be_bytes(bytes[12..16].try_into().unwrap()),
    })
}

/// Verifies the CRC over a full framed data record and returns `(key, value)`.
pub fn verify_data(frame: &[u8]) -> Result<(String, String), CodecError> {
    let header = decode_data_header(frame)?;
    let key_len = header.key_len as usize;
    let value_len = header.value_len as usize;

    if DATA_HEADER_SIZE + key_len + value_len != frame.len() {
        return Err(CodecError::CorruptRecord {
            reason: format!(
                "frame length {} does not match header-declared size {}",
                frame.len(),
                DATA_HEADER_SIZE + key_len + value_len
            ),
        });
    }

    let key = &frame[DATA_HEADER_SIZE..DATA_HEADER_SIZE + key_len];
    let value = &frame[DATA_HEADER_SIZE + key_len..];
    let expected = checksum(header.timestamp, key, value);
    if expected != header.crc {
        return Err(CodecError::CorruptRecord {
            reason: format!("crc mismatch: expected {:#x}, found {:#x}", header.crc, expected),
        });
    }

    let key = String::from_utf8(key.to_vec()).map_err(|e| CodecError::CorruptRecord {
        reason: format!("invalid utf-8 key: {e}"),
    })?;
    let value = String::from_utf8(value.to_vec()).map_err(|e| CodecError::CorruptRecord {
        reason: format!("invalid utf-8 value: {e}"),
    })?;

    Ok((key, value))
}

/// Builds the full framed hint record: `timestamp | key_len | entry_size | entry_offset | key`.
pub fn encode_hint(timestamp: u32, key: &str, entry_offset: u64, entry_size: u32) -> Vec<u8> {
    let key = key.as_bytes();
    let mut frame = Vec::with_capacity(HINT_HEADER_SIZE + key.len());
    frame.extend_from_slice(&timestamp.to_be_bytes());
    frame.extend_from_slice(&(key.len() as u32).to_be_bytes());
    frame.extend_from_slice(&entry_size.to_be_bytes());
    frame.extend_from_slice(&(entry_offset as u32).to_be_bytes());
    frame.extend_from_slice(key);
    frame
}

pub fn decode_hint_header(bytes: &[u8]) -> Result<HintHeader, CodecError> {
    if bytes.len() < HINT_HEADER_SIZE {
        return Err(CodecError::CorruptRecord {
            reason: format!(
                "hint header truncated: got {} bytes, need {}",
                bytes.len(),
                HINT_HEADER_SIZE
            ),
        });
    }
    Ok(HintHeader {
        timestamp: u32::from_be_bytes(bytes[0..4].try_into().unwrap()),
        key_len: u32::from_be_bytes(bytes[4..8].try_into().unwrap()),
        entry_size: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
        entry_offset: u32::from_be_bytes(bytes[12..16].try_into().unwrap()),
    })
}

/// Decodes a full framed hint record (header + key) into `(key, header)`.
pub fn decode_hint(frame: &[u8]) -> Result<(String, HintHeader), CodecError> {
    let header = decode_hint_header(frame)?;
    let key_len = header.key_len as usize;
    if HINT_HEADER_SIZE + key_len != frame.len() {
        return Err(CodecError::CorruptRecord {
            reason: format!(
                "hint frame length {} does not match header-declared size {}",
                frame.len(),
                HINT_HEADER_SIZE + key_len
            ),
        });
    }
    let key = String::from_utf8(frame[HINT_HEADER_SIZE..].to_vec()).map_err(|e| {
        CodecError::CorruptRecord {
            reason: format!("invalid utf-8 key: {e}"),
        }
    })?;
    Ok((key, header))
}
