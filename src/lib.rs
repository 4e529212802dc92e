//! # kvspool
//!
//! A daemon-less spool: one process appends key/value records to a
//! directory, others consume them in order, and the filesystem is the only
//! coordination medium.
//!
//! ## Core idea
//! Records are framed and appended to segment files whose names sort in
//! creation order. Writers serialize appends with an advisory lock per
//! segment; readers take no locks and simply follow a cursor through the
//! segments, treating an incomplete trailing frame as "not yet" rather than
//! as damage.

pub mod error;
pub mod handle;
pub mod options;
pub mod spool;
pub mod types;

// Public re-exports for the top-level API
pub use error::{Error, Result};
pub use handle::{Mode, Spool};
pub use options::{Limits, Options};
pub use spool::{Cursor, SegmentId, SpoolReader, SpoolStats, SpoolWriter, SyncPolicy};
pub use types::Record;
