//! Which files make up a spool, and in what order.
//!
//! A spool is every regular file in the directory named
//! `{base}.{seq:016}.sp`. The zero-padded sequence number is assigned at
//! creation, so lexicographic order is creation order and a directory listing
//! is the only index. New segments are claimed with `create_new`, which lets
//! exactly one of several racing creators win a given name.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::options::Options;
use crate::spool::reader::Cursor;

const SEGMENT_SUFFIX: &str = ".sp";
const SEQ_DIGITS: usize = 16;

/// Creation-order position of a segment within its spool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub u64);

impl SegmentId {
    pub const FIRST: SegmentId = SegmentId(1);

    pub fn next(self) -> SegmentId {
        SegmentId(self.0 + 1)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = SEQ_DIGITS)
    }
}

/// An open segment file, readable and append-only writable.
#[derive(Debug)]
pub struct SegmentFile {
    pub id: SegmentId,
    pub path: PathBuf,
    pub file: File,
}

/// Bytes stored in a spool and how many of them a cursor has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpoolStats {
    pub segments: usize,
    pub total_bytes: u64,
    pub consumed_bytes: u64,
    /// Modification time of the newest segment, if there is one.
    pub last_write: Option<SystemTime>,
}

impl SpoolStats {
    /// Percentage of stored bytes already consumed; an empty spool counts
    /// as fully consumed.
    pub fn pct_consumed(&self) -> u32 {
        if self.total_bytes == 0 {
            return 100;
        }
        (self.consumed_bytes as f64 * 100.0 / self.total_bytes as f64) as u32
    }
}

/// Naming and ordering of one spool's segment files.
#[derive(Debug, Clone)]
pub struct Layout {
    dir: PathBuf,
    base: String,
}

impl Layout {
    /// Bind to `dir`, creating it if `options.create_dir` allows.
    pub fn open(dir: &Path, options: &Options) -> Result<Self> {
        options.validate()?;
        match fs::metadata(dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(Error::Usage(format!("{} is not a directory", dir.display())));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && options.create_dir => {
                fs::create_dir_all(dir)?;
                debug!(dir = %dir.display(), "created spool directory");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::Usage(format!(
                    "spool directory {} does not exist",
                    dir.display()
                )));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Layout {
            dir: dir.to_path_buf(),
            base: options.base_name.clone(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn file_name(&self, id: SegmentId) -> String {
        format!("{}.{id}{SEGMENT_SUFFIX}", self.base)
    }

    pub fn path(&self, id: SegmentId) -> PathBuf {
        self.dir.join(self.file_name(id))
    }

    /// The segment id encoded in `name`, if `name` is one of this spool's files.
    pub fn parse_name(&self, name: &str) -> Option<SegmentId> {
        let rest = name.strip_prefix(self.base.as_str())?.strip_prefix('.')?;
        let digits = rest.strip_suffix(SEGMENT_SUFFIX)?;
        if digits.len() != SEQ_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(SegmentId)
    }

    /// All segments, oldest first.
    pub fn segments(&self) -> Result<Vec<SegmentId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|n| self.parse_name(n)) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn newest(&self) -> Result<Option<SegmentId>> {
        Ok(self.segments()?.last().copied())
    }

    /// The oldest segment strictly newer than `after`, or the oldest of all.
    pub fn next_read_segment(&self, after: Option<SegmentId>) -> Result<Option<SegmentId>> {
        Ok(self
            .segments()?
            .into_iter()
            .find(|&id| after.is_none_or(|after| id > after)))
    }

    /// Open an existing segment for reading and appending. A segment that
    /// vanished (removed by an external retention policy) is `Ok(None)`.
    pub fn open_segment(&self, id: SegmentId) -> Result<Option<SegmentFile>> {
        let path = self.path(id);
        match OpenOptions::new().read(true).append(true).open(&path) {
            Ok(file) => Ok(Some(SegmentFile { id, path, file })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Open an existing segment read-only, for consumers that may lack write
    /// permission on the spool.
    pub fn open_readonly(&self, id: SegmentId) -> Result<Option<SegmentFile>> {
        let path = self.path(id);
        match File::open(&path) {
            Ok(file) => Ok(Some(SegmentFile { id, path, file })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The segment a writer should append to: the newest one, or a fresh
    /// first segment in an empty spool. Whether it is actually usable
    /// (sealed, torn, full) is decided by the writer under the segment lock.
    pub fn current_write_segment(&self) -> Result<SegmentFile> {
        loop {
            match self.newest()? {
                Some(id) => {
                    if let Some(segment) = self.open_segment(id)? {
                        return Ok(segment);
                    }
                }
                None => return self.create_after(None),
            }
        }
    }

    /// Claim the segment following `prev`.
    ///
    /// If another writer claimed that name first, its segment is opened
    /// instead; the caller re-checks it under the lock like any other.
    pub fn create_after(&self, prev: Option<SegmentId>) -> Result<SegmentFile> {
        let id = prev.map_or(SegmentId::FIRST, SegmentId::next);
        let path = self.path(id);

        match OpenOptions::new()
            .read(true)
            .append(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => {
                info!(path = %path.display(), segment = %id, "created segment");
                Ok(SegmentFile { id, path, file })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(segment = %id, "segment claimed by another writer");
                match self.open_segment(id)? {
                    Some(segment) => Ok(segment),
                    None => self.current_write_segment(),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stored bytes and, for `cursor`, how many lie behind it.
    pub fn stats(&self, cursor: Option<&Cursor>) -> Result<SpoolStats> {
        let mut stats = SpoolStats::default();
        for id in self.segments()? {
            let meta = match fs::metadata(self.path(id)) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let size = meta.len();
            // Segments are visited oldest first
            stats.last_write = Some(meta.modified()?);
            stats.segments += 1;
            stats.total_bytes += size;
            stats.consumed_bytes += match cursor {
                Some(c) if id < c.segment => size,
                Some(c) if id == c.segment => c.offset.min(size),
                _ => 0,
            };
        }
        Ok(stats)
    }
}
