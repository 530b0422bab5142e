//! Live entry metadata used to populate archive headers.
//!
//! Headers are filled from the metadata of the file as it is opened, not from
//! what the walker saw, so a file rewritten mid-run is recorded consistently.

use chrono::{DateTime, Local, NaiveDateTime};
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Metadata recorded for one archive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMetadata {
    /// File size in bytes (zero for symlinks)
    pub size: u64,

    /// Last modified time (seconds since Unix epoch)
    pub modified: u64,

    /// Permission bits, file-type bits stripped
    pub mode: u32,
}

impl EntryMetadata {
    /// Extract metadata from an already-obtained `fs::Metadata`
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or_default();

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode() & 0o7777
        };

        // no permission bits to read
        #[cfg(not(unix))]
        let mode = 0o644;

        let size = if metadata.file_type().is_symlink() {
            0
        } else {
            metadata.len()
        };

        Self {
            size,
            modified,
            mode,
        }
    }

    /// Metadata of the link itself, never its target
    pub fn from_symlink(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        Ok(Self::from_metadata(&metadata))
    }

    /// Modification time in local wall-clock terms (zip stores no timezone)
    pub fn modified_local(&self) -> Option<NaiveDateTime> {
        let secs = i64::try_from(self.modified).ok()?;
        let utc = DateTime::from_timestamp(secs, 0)?;
        Some(utc.with_timezone(&Local).naive_local())
    }
}
