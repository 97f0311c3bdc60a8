use std::path::{Path, PathBuf};

use thiserror::Error;

/// The primary error type for all operations in the `ntk` crate.
#[derive(Debug, Error)]
pub enum ArchiverError {
    /// Options were rejected before any file was touched.
    #[error("invalid options: {0}")]
    Validation(String),

    /// The archive is encrypted and no password was supplied.
    #[error("this archive is encrypted; a password is required")]
    PasswordRequired,

    /// The input does not start with the container magic.
    #[error("not a recognized archive")]
    NotAnArchive,

    #[error("unsupported archive version {found} (supported {min}..={max})")]
    UnsupportedVersion { found: u16, min: u16, max: u16 },

    /// The magic matched but the stream ended early.
    #[error("truncated archive: {0}")]
    Truncated(&'static str),

    #[error("corrupt archive header: {0}")]
    CorruptHeader(String),

    /// AEAD tag mismatch; a wrong password and tampering look the same.
    #[error("wrong password or corrupted data")]
    Authentication,

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("payload of {needed} bytes does not fit in carrier image (capacity {available} bytes)")]
    Capacity { needed: u64, available: u64 },

    #[error("image declares a {declared}-byte payload but can hold at most {capacity} bytes; not a stego image or corrupted")]
    InvalidStegoPayload { declared: u64, capacity: u64 },

    #[error("image error: {0}")]
    Image(String),

    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Work abandoned because another part of the operation failed.
    #[error("operation cancelled")]
    Cancelled,
}

/// User-facing grouping of [`ArchiverError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Format,
    Authentication,
    Integrity,
    Capacity,
    Io,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Format => "format",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Integrity => "integrity",
            ErrorCategory::Capacity => "capacity",
            ErrorCategory::Io => "io",
        }
    }
}

impl ArchiverError {
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ArchiverError::Io { source, path: path.into() }
    }

    /// Attach `path` to an I/O error that was converted without one.
    pub fn at(self, path: &Path) -> Self {
        match self {
            ArchiverError::Io { source, path: p } if p.as_os_str().is_empty() => {
                ArchiverError::Io { source, path: path.to_path_buf() }
            }
            other => other,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ArchiverError::Validation(_) | ArchiverError::PasswordRequired => ErrorCategory::Validation,
            ArchiverError::NotAnArchive
            | ArchiverError::UnsupportedVersion { .. }
            | ArchiverError::Truncated(_)
            | ArchiverError::CorruptHeader(_)
            | ArchiverError::InvalidStegoPayload { .. }
            | ArchiverError::Image(_) => ErrorCategory::Format,
            ArchiverError::Authentication => ErrorCategory::Authentication,
            ArchiverError::Integrity(_) | ArchiverError::Cancelled => ErrorCategory::Integrity,
            ArchiverError::Capacity { .. } => ErrorCategory::Capacity,
            ArchiverError::Io { .. } => ErrorCategory::Io,
        }
    }
}

// Generic IO error conversion that doesn't require a path
impl From<std::io::Error> for ArchiverError {
    fn from(err: std::io::Error) -> Self {
        ArchiverError::Io { source: err, path: PathBuf::new() }
    }
}

impl From<image::ImageError> for ArchiverError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(e) => ArchiverError::from(e),
            other => ArchiverError::Image(other.to_string()),
        }
    }
}

pub type Result<T, E = ArchiverError> = std::result::Result<T, E>;
