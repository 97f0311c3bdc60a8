//! Common types shared by the operations and the CLI.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::archive::ArchiveSummary;

/// Metadata describing one archive, derived from its header and trailer.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FileMetadata {
    pub original_name: String,
    pub original_size: u64,
    /// Size of the whole container file in bytes.
    pub compressed_size: u64,
    /// `original_size / compressed_size`.
    pub compression_ratio: f64,
    pub encrypted: bool,
    pub creation_time: DateTime<Utc>,
    /// Hex whole-file checksum as stored in the trailer.
    pub checksum: String,
    pub block_count: u64,
    pub block_size: u32,
    pub format_version: u16,
    /// Seconds the producing operation took; 0 when only inspected.
    pub elapsed: f64,
}

impl FileMetadata {
    pub fn from_summary(summary: &ArchiveSummary, elapsed: f64) -> Self {
        let header = &summary.header;
        Self {
            original_name: header.name.clone(),
            original_size: header.original_size,
            compressed_size: summary.archive_size,
            compression_ratio: ratio(header.original_size, summary.archive_size),
            encrypted: header.is_encrypted(),
            creation_time: header.created_at,
            checksum: hex::encode(summary.trailer.checksum),
            block_count: header.block_count,
            block_size: header.block_size,
            format_version: header.version,
            elapsed,
        }
    }
}

pub fn ratio(original: u64, compressed: u64) -> f64 {
    if compressed == 0 {
        0.0
    } else {
        original as f64 / compressed as f64
    }
}
