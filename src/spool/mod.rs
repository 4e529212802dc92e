pub mod layout;
pub mod reader;
pub mod record;
pub mod writer;

pub use layout::{Layout, SegmentId, SpoolStats};
pub use reader::{Cursor, SpoolReader};
pub use record::{Decoded, FrameHeader, FrameKind};
pub use writer::SpoolWriter;

use serde::{Deserialize, Serialize};

/// Controls when an appended segment is fsync'd to disk.
///
/// Trade-off: durability vs throughput.
///   - EveryWrite: nothing acknowledged is lost on power failure
///   - EveryNWrites: lose up to N acknowledged records on crash
///   - EveryNMillis: bounded loss window, checked on each append
///
/// Readers see appended bytes as soon as they reach the page cache, whatever
/// the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// fsync after every append. Safest, slowest.
    #[default]
    EveryWrite,
    /// fsync every N appends.
    EveryNWrites(usize),
    /// fsync on the first append at least N milliseconds after the last sync.
    EveryNMillis(u64),
}
