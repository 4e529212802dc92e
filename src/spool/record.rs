use std::path::Path;

use thiserror::Error;

use crate::error::Error;
use crate::types::Record;

/// A frame's bytes do not follow the wire format.
///
/// Carries no location; callers attach the segment path and offset with
/// [`FormatError::at`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct FormatError(pub String);

impl FormatError {
    fn new(msg: impl Into<String>) -> Self {
        FormatError(msg.into())
    }

    pub fn at(self, path: &Path, offset: u64) -> Error {
        Error::corruption(path, offset, self.0)
    }
}

/// Leading tag of every frame.
pub const MAGIC: [u8; 3] = *b"KVS";
/// Wire format version written after the magic.
pub const VERSION: u8 = 1;

const FLAG_SEAL: u8 = 0x01;
const KNOWN_FLAGS: u8 = FLAG_SEAL;

// Header sizes
const MAGIC_SIZE: usize = 3;
const VERSION_SIZE: usize = 1;
const FLAGS_SIZE: usize = 1;
const LEN_SIZE: usize = 4;
const CRC_SIZE: usize = 4;
pub const HEADER_SIZE: usize = MAGIC_SIZE + VERSION_SIZE + FLAGS_SIZE + LEN_SIZE + CRC_SIZE;

const COUNT_SIZE: usize = 4;
const FIELD_LEN_SIZE: usize = 4;

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// A key/value record.
    Record,
    /// End-of-segment marker written by the writer that rotated away from it.
    Seal,
}

/// Parsed fixed-size frame header.
///
/// On-disk format (integers little-endian):
/// ```text
/// ┌──────────┬────────┬──────────┬──────────┬──────────┐
/// │ "KVS" 3B │ Ver 1B │ Flags 1B │ Len (4B) │ CRC (4B) │
/// └──────────┴────────┴──────────┴──────────┴──────────┘
/// payload (Len bytes):
/// ┌───────────┬─────────────┬─────┬─────────────┬───────┬───┐
/// │ Count(4B) │ Key Len(4B) │ Key │ Val Len(4B) │ Value │...│
/// └───────────┴─────────────┴─────┴─────────────┴───────┴───┘
/// ```
///
/// CRC covers the payload. A seal frame has an empty payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub payload_len: u32,
    pub crc: u32,
}

impl FrameHeader {
    /// Total bytes the frame occupies on disk, header included.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len as usize
    }
}

/// Outcome of a decode attempt at a frame boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete record and the number of bytes it consumed.
    Record(Record, usize),
    /// A seal frame and the number of bytes it consumed.
    Seal(usize),
    /// The bytes so far are a valid prefix of a frame; try again once more
    /// data has been appended.
    NeedMoreData,
}

/// Serialize a record into one frame.
pub fn encode(record: &Record) -> Result<Vec<u8>, FormatError> {
    let payload_len = payload_size(record);
    if payload_len > u32::MAX as usize {
        return Err(FormatError::new(format!(
            "record payload of {payload_len} bytes exceeds frame limit"
        )));
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload_len);
    buf.extend_from_slice(&MAGIC);
    buf.push(VERSION);
    buf.push(0);
    buf.extend_from_slice(&(payload_len as u32).to_le_bytes());

    // Reserve space for CRC (we'll fill it once the payload is in place)
    buf.extend_from_slice(&[0u8; CRC_SIZE]);

    buf.extend_from_slice(&(record.len() as u32).to_le_bytes());
    for (key, value) in record.iter() {
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(key.as_bytes());
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        buf.extend_from_slice(value.as_bytes());
    }

    let crc = crc32fast::hash(&buf[HEADER_SIZE..]);
    buf[HEADER_SIZE - CRC_SIZE..HEADER_SIZE].copy_from_slice(&crc.to_le_bytes());

    Ok(buf)
}

/// The end-of-segment marker frame.
pub fn encode_seal() -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE);
    buf.extend_from_slice(&MAGIC);
    buf.push(VERSION);
    buf.push(FLAG_SEAL);
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&[]).to_le_bytes());
    buf
}

/// Size of `record` once framed.
pub fn encoded_size(record: &Record) -> usize {
    HEADER_SIZE + payload_size(record)
}

fn payload_size(record: &Record) -> usize {
    record.iter().fold(COUNT_SIZE, |acc, (k, v)| {
        acc + 2 * FIELD_LEN_SIZE + k.len() + v.len()
    })
}

/// Parse just the header at the start of `data`.
///
/// `Ok(None)` means `data` is a valid but incomplete header prefix.
pub fn peek(data: &[u8]) -> Result<Option<FrameHeader>, FormatError> {
    let avail = data.len().min(MAGIC_SIZE);
    if data[..avail] != MAGIC[..avail] {
        return Err(FormatError::new("bad frame magic"));
    }
    if let Some(&version) = data.get(MAGIC_SIZE) {
        if version != VERSION {
            return Err(FormatError::new(format!("unsupported frame version: {version}")));
        }
    }
    let flags = match data.get(MAGIC_SIZE + VERSION_SIZE) {
        Some(&flags) => flags,
        None => return Ok(None),
    };
    if flags & !KNOWN_FLAGS != 0 {
        return Err(FormatError::new(format!("unknown frame flags: {flags:#04x}")));
    }
    if data.len() < HEADER_SIZE {
        return Ok(None);
    }

    let len_at = MAGIC_SIZE + VERSION_SIZE + FLAGS_SIZE;
    let payload_len = read_u32(data, len_at);
    let crc = read_u32(data, len_at + LEN_SIZE);

    let kind = if flags & FLAG_SEAL != 0 {
        if payload_len != 0 {
            return Err(FormatError::new("seal frame with non-empty payload"));
        }
        FrameKind::Seal
    } else {
        FrameKind::Record
    };

    Ok(Some(FrameHeader {
        kind,
        payload_len,
        crc,
    }))
}

/// Decode the frame at the start of `data`.
///
/// Never reads past the frame's declared length, so `data` may hold any
/// number of following frames.
pub fn decode(data: &[u8]) -> Result<Decoded, FormatError> {
    let header = match peek(data)? {
        Some(header) => header,
        None => return Ok(Decoded::NeedMoreData),
    };

    let total_len = header.frame_len();
    if data.len() < total_len {
        return Ok(Decoded::NeedMoreData);
    }

    let payload = &data[HEADER_SIZE..total_len];
    if crc32fast::hash(payload) != header.crc {
        return Err(FormatError::new("CRC mismatch"));
    }

    match header.kind {
        FrameKind::Seal => Ok(Decoded::Seal(total_len)),
        FrameKind::Record => Ok(Decoded::Record(decode_payload(payload)?, total_len)),
    }
}

fn decode_payload(payload: &[u8]) -> Result<Record, FormatError> {
    if payload.len() < COUNT_SIZE {
        return Err(FormatError::new("payload too short for pair count"));
    }
    let count = read_u32(payload, 0) as usize;
    let mut offset = COUNT_SIZE;

    let mut record = Record::new();
    for _ in 0..count {
        let key = read_field(payload, &mut offset, "key")?;
        let value = read_field(payload, &mut offset, "value")?;
        if record.insert(key, value).is_some() {
            return Err(FormatError::new("duplicate key in record"));
        }
    }

    if offset != payload.len() {
        return Err(FormatError::new(format!(
            "{} trailing bytes after last pair",
            payload.len() - offset
        )));
    }
    Ok(record)
}

fn read_field(payload: &[u8], offset: &mut usize, what: &str) -> Result<String, FormatError> {
    if payload.len() - *offset < FIELD_LEN_SIZE {
        return Err(FormatError::new(format!("{what} length exceeds record")));
    }
    let len = read_u32(payload, *offset) as usize;
    *offset += FIELD_LEN_SIZE;

    if payload.len() - *offset < len {
        return Err(FormatError::new(format!("{what} length exceeds record")));
    }
    let bytes = payload[*offset..*offset + len].to_vec();
    *offset += len;

    String::from_utf8(bytes).map_err(|_| FormatError::new(format!("{what} is not valid UTF-8")))
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(word)
}
