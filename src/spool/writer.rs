use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::options::Options;
use crate::spool::SyncPolicy;
use crate::spool::layout::{Layout, SegmentFile, SegmentId};
use crate::spool::record::{self, FrameKind, HEADER_SIZE};
use crate::types::Record;

const MAX_LOCK_BACKOFF: Duration = Duration::from_millis(50);

/// Appends records to the active segment of a spool.
///
/// Every append runs under an exclusive advisory lock on the segment file,
/// so records from concurrent writers (threads or processes) never
/// interleave. There is no user-space buffer: bytes reach the page cache,
/// and so become visible to readers, before `write` returns. `SyncPolicy`
/// only decides when they are also forced to disk.
///
/// Before appending, the writer reconciles what it knows about the segment
/// with what is on disk:
///   - another writer sealed it → move to the newest segment
///   - it ends in a torn frame (a writer died mid-append) → abandon it
///   - it reached its size/record bound → seal it and create the next one
pub struct SpoolWriter {
    layout: Layout,
    options: Options,
    max_segment_bytes: u64,
    segment: SegmentFile,
    /// End of the last frame known to be complete. Always a frame boundary.
    offset: u64,
    /// Record frames between the segment start and `offset`.
    records: u64,
    writes_since_sync: usize,
    last_sync: Instant,
}

enum Tail {
    Open,
    Sealed,
    Torn(String),
}

impl SpoolWriter {
    /// Open a writer on the spool in `dir`.
    pub fn open(dir: &Path, options: Options) -> Result<Self> {
        let layout = Layout::open(dir, &options)?;
        let max_segment_bytes = options.segment_bytes_for(dir);
        let segment = layout.current_write_segment()?;
        debug!(
            path = %segment.path.display(),
            max_segment_bytes,
            "opened spool writer"
        );

        Ok(SpoolWriter {
            layout,
            options,
            max_segment_bytes,
            segment,
            offset: 0,
            records: 0,
            writes_since_sync: 0,
            last_sync: Instant::now(),
        })
    }

    /// Append one record.
    pub fn write(&mut self, record: &Record) -> Result<()> {
        self.write_batch(std::slice::from_ref(record))
    }

    /// Append several records back to back under one lock hold.
    ///
    /// The records land contiguously in one segment and in order, but a crash
    /// mid-batch can leave only a prefix of them readable.
    pub fn write_batch(&mut self, records: &[Record]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for record in records {
            let frame = record::encode(record).map_err(|e| Error::Usage(e.to_string()))?;
            buf.extend_from_slice(&frame);
        }

        loop {
            let _lock = SegmentLock::acquire(&self.segment, self.options.lock_timeout)?;

            match self.reconcile()? {
                Tail::Open => {}
                Tail::Sealed => {
                    debug!(segment = %self.segment.id, "segment sealed by another writer");
                    let next = self.successor()?;
                    self.switch_to(next)?;
                    continue;
                }
                Tail::Torn(reason) => {
                    warn!(
                        path = %self.segment.path.display(),
                        offset = self.offset,
                        reason = %reason,
                        "abandoning segment with torn tail"
                    );
                    let next = self.successor()?;
                    self.switch_to(next)?;
                    continue;
                }
            }

            if self.is_full() {
                self.seal()?;
                let next = self.successor()?;
                info!(
                    from = %self.segment.id,
                    to = %next.id,
                    bytes = self.offset,
                    records = self.records,
                    "rotated segment"
                );
                self.switch_to(next)?;
                continue;
            }

            let mut file = &self.segment.file;
            file.write_all(&buf)?;
            self.offset += buf.len() as u64;
            self.records += records.len() as u64;
            self.after_append(records.len())?;
            return Ok(());
        }
    }

    /// Force everything appended so far to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.segment.file.sync_data()?;
        self.writes_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Sync and release the segment.
    pub fn close(mut self) -> Result<()> {
        if self.writes_since_sync > 0 {
            self.sync()?;
        }
        Ok(())
    }

    /// Segment the next append goes to, unless it has to rotate first.
    pub fn segment(&self) -> SegmentId {
        self.segment.id
    }

    pub fn path(&self) -> &Path {
        &self.segment.path
    }

    pub fn dir(&self) -> &Path {
        self.layout.dir()
    }

    /// Bytes in the active segment as of this writer's last append.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn is_full(&self) -> bool {
        if self.records == 0 {
            return false;
        }
        self.offset >= self.max_segment_bytes
            || self
                .options
                .max_segment_records
                .is_some_and(|max| self.records >= max)
    }

    /// Walk frame headers appended since our last known boundary.
    /// Only called with the segment lock held.
    fn reconcile(&mut self) -> Result<Tail> {
        let len = self.segment.file.metadata()?.len();
        if len < self.offset {
            return Ok(Tail::Torn(format!("segment shrank from {} to {len}", self.offset)));
        }

        let mut file = &self.segment.file;
        let mut head = [0u8; HEADER_SIZE];
        while self.offset < len {
            let avail = ((len - self.offset) as usize).min(HEADER_SIZE);
            file.seek(SeekFrom::Start(self.offset))?;
            file.read_exact(&mut head[..avail])?;

            let header = match record::peek(&head[..avail]) {
                Ok(Some(header)) => header,
                Ok(None) => return Ok(Tail::Torn("incomplete frame header".into())),
                Err(e) => return Ok(Tail::Torn(e.to_string())),
            };
            let end = self.offset + header.frame_len() as u64;
            if end > len {
                return Ok(Tail::Torn("incomplete frame".into()));
            }
            self.offset = end;
            match header.kind {
                FrameKind::Seal => return Ok(Tail::Sealed),
                FrameKind::Record => self.records += 1,
            }
        }
        Ok(Tail::Open)
    }

    /// Mark the active segment closed to further appends. Lock held.
    fn seal(&mut self) -> Result<()> {
        let seal = record::encode_seal();
        let mut file = &self.segment.file;
        file.write_all(&seal)?;
        self.segment.file.sync_data()?;
        self.offset += seal.len() as u64;
        self.writes_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// The segment to use once the active one can take no more appends:
    /// a newer one if it already exists, else a freshly created one.
    fn successor(&self) -> Result<SegmentFile> {
        if let Some(newest) = self.layout.newest()? {
            if newest > self.segment.id {
                if let Some(segment) = self.layout.open_segment(newest)? {
                    return Ok(segment);
                }
            }
        }
        self.layout.create_after(Some(self.segment.id))
    }

    /// Acknowledged but unsynced appends are synced before the old segment
    /// is dropped; a failed sync leaves the writer on the old segment.
    fn switch_to(&mut self, segment: SegmentFile) -> Result<()> {
        if self.writes_since_sync > 0 {
            self.sync()?;
        }
        self.segment = segment;
        self.offset = 0;
        self.records = 0;
        Ok(())
    }

    fn after_append(&mut self, appended: usize) -> Result<()> {
        self.writes_since_sync += appended;
        let due = match self.options.sync_policy {
            SyncPolicy::EveryWrite => true,
            SyncPolicy::EveryNWrites(n) => self.writes_since_sync >= n,
            SyncPolicy::EveryNMillis(ms) => self.last_sync.elapsed() >= Duration::from_millis(ms),
        };
        if due {
            self.sync()?;
        }
        Ok(())
    }
}

/// Exclusive advisory lock on a segment, released on drop.
///
/// Holds a duplicate of the segment's descriptor, which shares the lock with
/// the original, so the writer stays free to mutate itself while locked.
struct SegmentLock {
    file: File,
}

impl SegmentLock {
    fn acquire(segment: &SegmentFile, timeout: Duration) -> Result<Self> {
        let file = segment.file.try_clone()?;
        let start = Instant::now();
        let mut backoff = Duration::from_millis(1);

        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(SegmentLock { file }),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        return Err(Error::LockTimeout {
                            path: segment.path.clone(),
                            waited,
                        });
                    }
                    debug!(
                        path = %segment.path.display(),
                        waited_ms = waited.as_millis() as u64,
                        "waiting for segment lock"
                    );
                    let jitter = rand::thread_rng().gen_range(0..=backoff.as_micros() as u64);
                    let pause = backoff + Duration::from_micros(jitter);
                    thread::sleep(pause.min(timeout - waited));
                    backoff = (backoff * 2).min(MAX_LOCK_BACKOFF);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for SegmentLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl std::fmt::Debug for SpoolWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpoolWriter")
            .field("path", &self.segment.path)
            .field("offset", &self.offset)
            .field("records", &self.records)
            .finish()
    }
}
