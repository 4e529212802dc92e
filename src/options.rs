//! Spool configuration.
//!
//! Options come from code (builder setters), from TOML, and from an optional
//! `limits` file inside the spool directory that caps the directory size.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::spool::SyncPolicy;

/// Segment size bound used when nothing else is configured.
pub const DEFAULT_MAX_SEGMENT_BYTES: u64 = 1024 * 1024 * 1024;
/// Base name used when none is given.
pub const DEFAULT_BASE_NAME: &str = "kv";
/// Name of the optional size-cap file inside a spool directory.
pub const LIMITS_FILE: &str = "limits";

/// Configuration shared by readers and writers of one spool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Segment file prefix. Must be non-empty and free of `.` and separators.
    pub base_name: String,
    /// Whether `read()` waits for a record instead of returning `None`.
    pub blocking: bool,
    /// Create the spool directory on open when it is missing.
    pub create_dir: bool,
    /// Rotate once a segment holds at least this many bytes. `None` defers
    /// to the `limits` file, then to [`DEFAULT_MAX_SEGMENT_BYTES`].
    pub max_segment_bytes: Option<u64>,
    /// Rotate once a segment holds this many records.
    pub max_segment_records: Option<u64>,
    /// Sleep between attempts of a blocking read.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Longest a writer waits for the append lock.
    #[serde(with = "millis")]
    pub lock_timeout: Duration,
    pub sync_policy: SyncPolicy,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            base_name: DEFAULT_BASE_NAME.to_string(),
            blocking: false,
            create_dir: true,
            max_segment_bytes: None,
            max_segment_records: None,
            poll_interval: Duration::from_millis(50),
            lock_timeout: Duration::from_secs(5),
            sync_policy: SyncPolicy::EveryWrite,
        }
    }
}

impl Options {
    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = base_name.into();
        self
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn with_create_dir(mut self, create_dir: bool) -> Self {
        self.create_dir = create_dir;
        self
    }

    pub fn with_max_segment_bytes(mut self, bytes: u64) -> Self {
        self.max_segment_bytes = Some(bytes);
        self
    }

    pub fn with_max_segment_records(mut self, records: u64) -> Self {
        self.max_segment_records = Some(records);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: Options = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject a base name that cannot be told apart from the segment suffix
    /// or that escapes the spool directory.
    pub fn validate(&self) -> Result<()> {
        let base = &self.base_name;
        if base.is_empty() {
            return Err(Error::Usage("base name must not be empty".into()));
        }
        if base.contains(['.', '/', '\\']) {
            return Err(Error::Usage(format!(
                "base name {base:?} must not contain '.' or path separators"
            )));
        }
        Ok(())
    }

    /// Segment size bound in effect for `dir`.
    pub fn segment_bytes_for(&self, dir: &Path) -> u64 {
        if let Some(bytes) = self.max_segment_bytes {
            return bytes;
        }
        match Limits::read(dir) {
            Ok(Some(limits)) => limits.segment_bytes(),
            Ok(None) => DEFAULT_MAX_SEGMENT_BYTES,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "ignoring unreadable limits file");
                DEFAULT_MAX_SEGMENT_BYTES
            }
        }
    }
}

/// Directory size cap read from a spool's `limits` file.
///
/// The file holds a number with an optional k/m/g/t unit (1024-based), e.g.
/// `100M`. Zero means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub dir_max: u64,
}

impl Limits {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let (digits, unit) = text.split_at(split);

        let number: u64 = digits
            .parse()
            .map_err(|_| Error::Config(format!("limits: expected a size, got {text:?}")))?;

        let shift = match unit.trim() {
            "" => 0,
            "k" | "K" => 10,
            "m" | "M" => 20,
            "g" | "G" => 30,
            "t" | "T" => 40,
            other => return Err(Error::Config(format!("limits: unsupported unit {other:?}"))),
        };

        let dir_max = number
            .checked_mul(1u64 << shift)
            .ok_or_else(|| Error::Config(format!("limits: {text:?} overflows")))?;
        Ok(Limits { dir_max })
    }

    /// Read `dir/limits`. A missing file is `Ok(None)`.
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(dir.join(LIMITS_FILE)) {
            Ok(text) => Self::parse(&text).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// A tenth of the directory cap, never above the default bound.
    pub fn segment_bytes(&self) -> u64 {
        if self.dir_max == 0 {
            return DEFAULT_MAX_SEGMENT_BYTES;
        }
        (self.dir_max / 10).min(DEFAULT_MAX_SEGMENT_BYTES)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_units_are_binary() {
        assert_eq!(Limits::parse("4096").unwrap().dir_max, 4096);
        assert_eq!(Limits::parse("2k").unwrap().dir_max, 2048);
        assert_eq!(Limits::parse("100M\n").unwrap().dir_max, 100 << 20);
        assert_eq!(Limits::parse("1G").unwrap().dir_max, 1 << 30);
        assert_eq!(Limits::parse("1t").unwrap().dir_max, 1 << 40);
    }

    #[test]
    fn limits_rejects_garbage() {
        assert!(Limits::parse("lots").is_err());
        assert!(Limits::parse("10x").is_err());
        assert!(Limits::parse("").is_err());
    }

    #[test]
    fn limits_segment_bound_is_a_tenth_capped() {
        assert_eq!(Limits { dir_max: 1000 }.segment_bytes(), 100);
        assert_eq!(Limits { dir_max: 0 }.segment_bytes(), DEFAULT_MAX_SEGMENT_BYTES);
        assert_eq!(Limits { dir_max: 1 << 40 }.segment_bytes(), DEFAULT_MAX_SEGMENT_BYTES);
    }

    #[test]
    fn base_name_validation() {
        assert!(Options::default().validate().is_ok());
        assert!(Options::default().with_base_name("").validate().is_err());
        assert!(Options::default().with_base_name("a.b").validate().is_err());
        assert!(Options::default().with_base_name("../x").validate().is_err());
    }
}
