use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::options::Options;
use crate::spool::{Cursor, SpoolReader, SpoolStats, SpoolWriter};
use crate::types::Record;

/// Which side of the spool a handle is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Read => f.write_str("read"),
            Mode::Write => f.write_str("write"),
        }
    }
}

enum Side {
    Reader(SpoolReader),
    Writer(SpoolWriter),
}

/// A spool directory opened for reading or for writing.
///
/// Calling a method of the other mode is a usage error, reported at once.
/// Files and locks are released when the handle is closed or dropped.
pub struct Spool {
    side: Side,
}

impl Spool {
    pub fn open(dir: &Path, mode: Mode, options: Options) -> Result<Self> {
        let side = match mode {
            Mode::Read => Side::Reader(SpoolReader::open(dir, options)?),
            Mode::Write => Side::Writer(SpoolWriter::open(dir, options)?),
        };
        Ok(Spool { side })
    }

    pub fn reader(dir: &Path, options: Options) -> Result<Self> {
        Self::open(dir, Mode::Read, options)
    }

    /// A reader resuming at a previously saved position.
    pub fn reader_at(dir: &Path, options: Options, cursor: Cursor) -> Result<Self> {
        Ok(Spool {
            side: Side::Reader(SpoolReader::open_at(dir, options, cursor)?),
        })
    }

    pub fn writer(dir: &Path, options: Options) -> Result<Self> {
        Self::open(dir, Mode::Write, options)
    }

    pub fn mode(&self) -> Mode {
        match self.side {
            Side::Reader(_) => Mode::Read,
            Side::Writer(_) => Mode::Write,
        }
    }

    pub fn dir(&self) -> &Path {
        match &self.side {
            Side::Reader(r) => r.dir(),
            Side::Writer(w) => w.dir(),
        }
    }

    pub fn write(&mut self, record: &Record) -> Result<()> {
        self.writer_mut("write")?.write(record)
    }

    pub fn write_batch(&mut self, records: &[Record]) -> Result<()> {
        self.writer_mut("write_batch")?.write_batch(records)
    }

    /// Force appended records to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.writer_mut("sync")?.sync()
    }

    /// Next record, or `None` if none is available (non-blocking mode only).
    pub fn read(&mut self) -> Result<Option<Record>> {
        self.reader_mut("read")?.read()
    }

    pub fn read_timeout(&mut self, timeout: Duration) -> Result<Option<Record>> {
        self.reader_mut("read_timeout")?.read_timeout(timeout)
    }

    pub fn skip_segment(&mut self) -> Result<bool> {
        self.reader_mut("skip_segment")?.skip_segment()
    }

    pub fn position(&self) -> Result<Cursor> {
        match &self.side {
            Side::Reader(r) => Ok(r.position()),
            Side::Writer(_) => Err(misuse("position", Mode::Write)),
        }
    }

    pub fn stats(&self) -> Result<SpoolStats> {
        match &self.side {
            Side::Reader(r) => r.stats(),
            Side::Writer(_) => Err(misuse("stats", Mode::Write)),
        }
    }

    /// Release the handle, syncing a writer's pending appends first.
    pub fn close(self) -> Result<()> {
        match self.side {
            Side::Reader(_) => Ok(()),
            Side::Writer(w) => w.close(),
        }
    }

    fn reader_mut(&mut self, op: &str) -> Result<&mut SpoolReader> {
        match &mut self.side {
            Side::Reader(r) => Ok(r),
            Side::Writer(_) => Err(misuse(op, Mode::Write)),
        }
    }

    fn writer_mut(&mut self, op: &str) -> Result<&mut SpoolWriter> {
        match &mut self.side {
            Side::Writer(w) => Ok(w),
            Side::Reader(_) => Err(misuse(op, Mode::Read)),
        }
    }
}

fn misuse(op: &str, mode: Mode) -> Error {
    Error::Usage(format!("{op} called on a spool handle opened for {mode}"))
}

impl fmt::Debug for Spool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.side {
            Side::Reader(r) => fmt::Debug::fmt(r, f),
            Side::Writer(w) => fmt::Debug::fmt(w, f),
        }
    }
}
