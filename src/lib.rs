//! # ntk Core Library
//!
//! This crate provides the archive engine behind the `ntk` command-line application.
//! It turns one file into a self-describing `.ntk` container (optionally encrypted,
//! optionally hidden in an image) and reverses that exactly.
//!
//! ## Key Modules
//!
//! - [`splitter`]: Fixed-size block partitioning and in-order reassembly.
//! - [`codec`]: Per-block `zstd` compression with an optional shared dictionary.
//! - [`crypto`]: Password-derived keys and AES-256-GCM block sealing.
//! - [`archive`]: The on-disk container format.
//! - [`workers`]: The ordered parallel block pipeline.
//! - [`stegano`]: Hiding containers in the low bits of image pixels.
//! - [`compress`] / [`extract`]: The operations built from the pieces above.
//!
//! ## Examples
//!
//! ```no_run
//! use ntk::{compress, decompress, inspect_metadata, CompressionOptions};
//! use std::path::Path;
//!
//! # fn main() -> ntk::Result<()> {
//! let options = CompressionOptions { level: 9, ..Default::default() };
//! let meta = compress(Path::new("data.bin"), Path::new("data.bin.ntk"), &options, None)?;
//! println!("ratio {:.2}", meta.compression_ratio);
//!
//! assert_eq!(inspect_metadata(Path::new("data.bin.ntk"))?.original_size, meta.original_size);
//! decompress(Path::new("data.bin.ntk"), Path::new("restored.bin"), None, None)?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod cli;
pub mod cli_runner;
pub mod codec;
pub mod common;
pub mod compress;
pub mod crypto;
pub mod error;
pub mod extract;
pub mod fsx;
pub mod progress;
pub mod splitter;
pub mod stegano;
pub mod workers;

pub use common::FileMetadata;
pub use compress::{compress, CompressionOptions};
pub use error::{ArchiverError, ErrorCategory, Result};
pub use extract::{decompress, inspect_metadata};
pub use progress::{ProgressCallback, ProgressEvent};
pub use stegano::{extract_from_image, hide_in_image};
