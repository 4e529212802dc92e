use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::options::Options;
use crate::spool::layout::{Layout, SegmentFile, SegmentId, SpoolStats};
use crate::spool::record::{self, Decoded, HEADER_SIZE};
use crate::types::Record;

/// A consumer's position: a segment and a byte offset that is always on a
/// frame boundary.
///
/// Not persisted by the spool. A consumer that wants to resume after a
/// restart stores it itself and passes it to [`SpoolReader::open_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub segment: SegmentId,
    pub offset: u64,
}

impl Cursor {
    /// Before the oldest segment.
    pub const START: Cursor = Cursor {
        segment: SegmentId(0),
        offset: 0,
    };
}

impl Default for Cursor {
    fn default() -> Self {
        Cursor::START
    }
}

/// Result of one decode attempt at the cursor.
enum Step {
    Record(Record, usize),
    Seal,
    /// Cursor sits exactly at the end of the segment's data.
    End,
    /// Bytes at the cursor are a valid prefix of a frame that is not
    /// complete yet.
    Partial,
}

/// Reads records from a spool in append order.
///
/// The reader never writes to the spool and takes no locks, so any number of
/// readers may follow the same spool, each seeing every record. A single
/// `read` moves across segment boundaries on its own.
///
/// Segment switch rules:
///   - a seal frame ends a segment; move on once its successor exists
///   - at the exact end of a segment that has a successor, move on
///   - an incomplete frame in a segment that has a successor can never be
///     completed, so it is reported as corruption
///
/// Whenever a successor is observed, the current segment is decoded once
/// more before leaving it: appends that raced with the directory listing
/// land before the seal and must not be skipped.
pub struct SpoolReader {
    layout: Layout,
    options: Options,
    cursor: Cursor,
    segment: Option<SegmentFile>,
    buf: Vec<u8>,
}

impl SpoolReader {
    /// Open a reader positioned before the oldest record in `dir`.
    pub fn open(dir: &Path, options: Options) -> Result<Self> {
        let layout = Layout::open(dir, &options)?;
        Ok(SpoolReader {
            layout,
            options,
            cursor: Cursor::START,
            segment: None,
            buf: Vec::new(),
        })
    }

    /// Open a reader resuming at `cursor`.
    ///
    /// If the cursor's segment is gone (removed by a retention policy outside
    /// the spool), reading resumes at the start of the next newer segment.
    pub fn open_at(dir: &Path, options: Options, cursor: Cursor) -> Result<Self> {
        let mut reader = Self::open(dir, options)?;
        reader.cursor = cursor;
        if cursor != Cursor::START {
            reader.segment = reader.layout.open_readonly(cursor.segment)?;
            if reader.segment.is_none() {
                warn!(
                    dir = %dir.display(),
                    segment = %cursor.segment,
                    "cursor segment no longer exists; resuming at next segment"
                );
            }
        }
        Ok(reader)
    }

    /// Read the next record, honoring the blocking flag.
    ///
    /// Non-blocking: `Ok(None)` when nothing is available right now.
    /// Blocking: waits, polling every `poll_interval`, until a record exists.
    pub fn read(&mut self) -> Result<Option<Record>> {
        if !self.options.blocking {
            return self.try_read();
        }
        loop {
            if let Some(record) = self.try_read()? {
                return Ok(Some(record));
            }
            thread::sleep(self.options.poll_interval);
        }
    }

    /// Like a blocking `read`, but gives up with `Ok(None)` after `timeout`.
    pub fn read_timeout(&mut self, timeout: Duration) -> Result<Option<Record>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(record) = self.try_read()? {
                return Ok(Some(record));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(self.options.poll_interval.min(deadline - now));
        }
    }

    /// One non-blocking attempt, whatever the blocking flag says.
    pub fn try_read(&mut self) -> Result<Option<Record>> {
        loop {
            if !self.locate()? {
                return Ok(None);
            }

            match self.step()? {
                Step::Record(record, consumed) => return Ok(Some(self.consume(record, consumed))),
                Step::Seal => {
                    if !self.advance()? {
                        return Ok(None);
                    }
                }
                Step::End | Step::Partial => {
                    let Some(next) = self.layout.next_read_segment(Some(self.cursor.segment))? else {
                        return Ok(None);
                    };
                    match self.step()? {
                        Step::Record(record, consumed) => {
                            return Ok(Some(self.consume(record, consumed)));
                        }
                        Step::Seal | Step::End => {
                            if !self.advance()? {
                                return Ok(None);
                            }
                        }
                        Step::Partial => {
                            return Err(Error::corruption(
                                self.current_path(),
                                self.cursor.offset,
                                format!("torn record; segment {next} already follows"),
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Move past the current segment to the start of its successor.
    ///
    /// This is the only way past a segment reported as corrupt; the reader
    /// never skips data on its own. Returns `false` if no successor exists
    /// yet, leaving the position unchanged.
    pub fn skip_segment(&mut self) -> Result<bool> {
        self.advance()
    }

    /// Current position, always at a frame boundary.
    pub fn position(&self) -> Cursor {
        self.cursor
    }

    pub fn dir(&self) -> &Path {
        self.layout.dir()
    }

    /// Bytes stored in the spool and how many this reader has passed.
    pub fn stats(&self) -> Result<SpoolStats> {
        self.layout.stats(Some(&self.cursor))
    }

    fn consume(&mut self, record: Record, consumed: usize) -> Record {
        self.cursor.offset += consumed as u64;
        record
    }

    fn current_path(&self) -> &Path {
        match &self.segment {
            Some(segment) => &segment.path,
            None => self.layout.dir(),
        }
    }

    /// Make sure a segment is open. `false` if the spool has nothing at or
    /// after the cursor yet.
    fn locate(&mut self) -> Result<bool> {
        if self.segment.is_some() {
            return Ok(true);
        }
        loop {
            let Some(id) = self.layout.next_read_segment(Some(self.cursor.segment))? else {
                return Ok(false);
            };
            // A segment deleted between listing and open: list again.
            if let Some(segment) = self.layout.open_readonly(id)? {
                debug!(segment = %id, "reader entered segment");
                self.segment = Some(segment);
                self.cursor = Cursor {
                    segment: id,
                    offset: 0,
                };
                return Ok(true);
            }
        }
    }

    /// Switch to the segment after the current one, if it exists.
    fn advance(&mut self) -> Result<bool> {
        let from = self.cursor.segment;
        loop {
            let Some(id) = self.layout.next_read_segment(Some(from))? else {
                return Ok(false);
            };
            if let Some(segment) = self.layout.open_readonly(id)? {
                debug!(from = %from, to = %id, "reader advanced segment");
                self.segment = Some(segment);
                self.cursor = Cursor {
                    segment: id,
                    offset: 0,
                };
                return Ok(true);
            }
        }
    }

    /// Decode the frame at the cursor without moving it.
    fn step(&mut self) -> Result<Step> {
        let Some(segment) = &self.segment else {
            return Ok(Step::End);
        };
        let offset = self.cursor.offset;
        let len = segment.file.metadata()?.len();
        if offset > len {
            return Err(Error::corruption(
                &segment.path,
                offset,
                format!("cursor is past the end of a {len} byte segment"),
            ));
        }
        if offset == len {
            return Ok(Step::End);
        }

        let avail = (len - offset) as usize;
        let mut file = &segment.file;
        let mut head = [0u8; HEADER_SIZE];
        let head_len = avail.min(HEADER_SIZE);
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut head[..head_len])?;

        let header = match record::peek(&head[..head_len]) {
            Ok(Some(header)) => header,
            Ok(None) => return Ok(Step::Partial),
            Err(e) => return Err(e.at(&segment.path, offset)),
        };
        let frame_len = header.frame_len();
        if avail < frame_len {
            return Ok(Step::Partial);
        }

        self.buf.clear();
        self.buf.resize(frame_len, 0);
        self.buf[..HEADER_SIZE].copy_from_slice(&head);
        file.read_exact(&mut self.buf[HEADER_SIZE..])?;

        match record::decode(&self.buf) {
            Ok(Decoded::Record(record, consumed)) => Ok(Step::Record(record, consumed)),
            Ok(Decoded::Seal(_)) => Ok(Step::Seal),
            Ok(Decoded::NeedMoreData) => Ok(Step::Partial),
            Err(e) => Err(e.at(&segment.path, offset)),
        }
    }
}

/// Drains the records available right now without blocking.
impl Iterator for SpoolReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_read().transpose()
    }
}

impl std::fmt::Debug for SpoolReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpoolReader")
            .field("dir", &self.layout.dir())
            .field("cursor", &self.cursor)
            .field("blocking", &self.options.blocking)
            .finish()
    }
}
