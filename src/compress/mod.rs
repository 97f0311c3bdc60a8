//! # Compression Pipeline
//!
//! Turns one input file into a `.ntk` container. The input is split into fixed
//! blocks on the calling thread, blocks are compressed (and sealed, when a
//! password is set) on a worker pool, and records are committed to the output
//! in block order. The whole-file checksum is taken over the raw blocks as they
//! are read.
//!
//! - **Dictionary Training**: for inputs of at least eight blocks a shared `zstd`
//!   dictionary is trained from samples of the input and stored once per archive.
//! - **Stored fallback**: blocks that do not shrink are kept verbatim.
//! - **Steganography**: the finished container can be hidden in a carrier image
//!   instead of being written as a plain file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::{
    ArchiveSummary, ArchiveTrailer, ArchiveWriter, BlockRecord, CipherHeader, ContainerHeader, StoredDictionary,
    FORMAT_VERSION, MAX_BLOCK_SIZE, MAX_DICTIONARY_SIZE, MAX_NAME_LEN, MIN_BLOCK_SIZE,
};
use crate::codec::{self, BlockCodec, MAX_LEVEL, MIN_LEVEL};
use crate::common::FileMetadata;
use crate::crypto::{self, ArchiveKey, KdfParams};
use crate::fsx::{self, AtomicFile};
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::splitter::{self, BlockSplitter};
use crate::stegano;
use crate::{ArchiverError, Result};

pub const DEFAULT_LEVEL: i32 = 19;
pub const DEFAULT_BLOCK_SIZE: u32 = 16 * 1024 * 1024;
pub const DEFAULT_DICTIONARY_SIZE: usize = 110 * 1024;
pub const MAX_THREADS: usize = 1024;

/// Holds all configuration options for a compression operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionOptions {
    /// zstd level, 1..=22.
    pub level: i32,
    /// Worker threads. Defaults to the number of logical CPUs.
    pub threads: usize,
    /// Power of two between 64 KiB and 64 MiB.
    pub block_size: u32,
    /// Upper bound for the trained dictionary; 0 disables training.
    pub dictionary_size: usize,
    pub use_encryption: bool,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub kdf: KdfParams,
    pub use_steganography: bool,
    pub steganography_image: Option<PathBuf>,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            threads: num_cpus::get(),
            block_size: DEFAULT_BLOCK_SIZE,
            dictionary_size: DEFAULT_DICTIONARY_SIZE,
            use_encryption: false,
            password: None,
            kdf: KdfParams::default(),
            use_steganography: false,
            steganography_image: None,
        }
    }
}

impl CompressionOptions {
    /// Reject out-of-range settings before any file is touched.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ArchiverError::Validation(msg));
        if !(MIN_LEVEL..=MAX_LEVEL).contains(&self.level) {
            return invalid(format!("compression level {} outside {}..={}", self.level, MIN_LEVEL, MAX_LEVEL));
        }
        if !(1..=MAX_THREADS).contains(&self.threads) {
            return invalid(format!("thread count {} outside 1..={}", self.threads, MAX_THREADS));
        }
        if !self.block_size.is_power_of_two() || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return invalid(format!(
                "block size {} must be a power of two between {} and {}",
                self.block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE
            ));
        }
        if self.dictionary_size > MAX_DICTIONARY_SIZE {
            return invalid(format!("dictionary size {} exceeds {}", self.dictionary_size, MAX_DICTIONARY_SIZE));
        }
        let has_password = self.password.as_deref().is_some_and(|p| !p.is_empty());
        if self.use_encryption {
            if !has_password {
                return invalid("encryption requested but no password given".into());
            }
            self.kdf.validate().map_err(ArchiverError::Validation)?;
        } else if has_password {
            return invalid("a password was given but encryption is not enabled".into());
        }
        if self.use_steganography && self.steganography_image.is_none() {
            return invalid("steganography requested but no carrier image given".into());
        }
        Ok(())
    }

    fn password(&self) -> Option<&str> {
        if self.use_encryption {
            self.password.as_deref()
        } else {
            None
        }
    }
}

/// Compress `input` into a container at `output`.
///
/// With steganography enabled, `output` receives the carrier image with the
/// container embedded, and the returned metadata describes the container.
/// Nothing is created at `output` unless the whole operation succeeds.
pub fn compress(
    input: &Path,
    output: &Path,
    options: &CompressionOptions,
    progress: Option<&ProgressCallback<'_>>,
) -> Result<FileMetadata> {
    options.validate()?;
    if options.use_steganography {
        stegano::lossless_format(output)?;
    }
    if fsx::same_file(input, output) {
        return Err(ArchiverError::Validation("input and output are the same file".into()));
    }

    let started = Instant::now();
    let (file, total) = fsx::open_with_len(input)?;
    let name = archive_name(input)?;

    let summary = if let Some(carrier) = options.steganography_image.as_deref().filter(|_| options.use_steganography) {
        let mut scratch = tempfile::tempfile().map_err(|e| ArchiverError::io(e, output))?;
        let summary = write_container(file, total, name, input, &scratch, options, progress)
            .map_err(|e| e.at(output))?;
        scratch.seek(SeekFrom::Start(0))?;
        let mut container = Vec::with_capacity(summary.archive_size as usize);
        scratch.read_to_end(&mut container)?;
        stegano::hide_payload_in_image(&container, carrier, output)?;
        summary
    } else {
        let target = AtomicFile::create(output)?;
        let summary = write_container(file, total, name, input, target.file(), options, progress)
            .map_err(|e| e.at(output))?;
        target.persist()?;
        summary
    };

    let elapsed = started.elapsed().as_secs_f64();
    let metadata = FileMetadata::from_summary(&summary, elapsed);
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        original = metadata.original_size,
        compressed = metadata.compressed_size,
        ratio = metadata.compression_ratio,
        encrypted = metadata.encrypted,
        elapsed_s = elapsed,
        "compressed"
    );
    Ok(metadata)
}

fn archive_name(input: &Path) -> Result<String> {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().replace(['\\', '\0'], "_"))
        .ok_or_else(|| ArchiverError::Validation(format!("'{}' has no file name", input.display())))?;
    if name.len() > MAX_NAME_LEN {
        return Err(ArchiverError::Validation(format!("file name longer than {} bytes", MAX_NAME_LEN)));
    }
    Ok(name)
}

fn write_container(
    file: File,
    total: u64,
    name: String,
    input: &Path,
    sink: &File,
    options: &CompressionOptions,
    progress: Option<&ProgressCallback<'_>>,
) -> Result<ArchiveSummary> {
    let block_size = options.block_size;
    let block_count = splitter::block_count(total, block_size);
    let mut blocks = BlockSplitter::new(BufReader::with_capacity(1024 * 1024, file), block_size, total);

    let dictionary = codec::train_dictionary(blocks.get_mut(), total, block_count, options.dictionary_size)
        .map_err(|e| e.at(input))?;
    blocks.restart().map_err(|e| e.at(input))?;
    let codec = BlockCodec::new(options.level, dictionary);

    let cipher = options.password().map(|_| CipherHeader {
        kdf: options.kdf,
        salt: crypto::generate_salt(),
        base_nonce: crypto::generate_base_nonce(),
    });
    let header = ContainerHeader {
        version: FORMAT_VERSION,
        level: options.level as u8,
        block_size,
        block_count,
        original_size: total,
        created_at: Utc::now().trunc_subsecs(0),
        name,
        has_dictionary: codec.dictionary().is_some(),
        cipher,
    };
    tracing::debug!(
        blocks = block_count,
        block_size,
        level = options.level,
        threads = options.threads,
        dictionary = codec.dictionary().map_or(0, |d| d.len()),
        encrypted = header.is_encrypted(),
        "archive plan"
    );

    let out = BufWriter::with_capacity(8 * 1024 * 1024, sink);
    let mut writer = ArchiveWriter::new(out, header)?;

    let key = match (options.password(), &writer.header().cipher) {
        (Some(password), Some(cipher)) => {
            tracing::debug!(kdf = ?cipher.kdf.algorithm, "deriving archive key");
            Some(ArchiveKey::from_password(
                password,
                &cipher.salt,
                &cipher.kdf,
                cipher.base_nonce,
                writer.header_digest(),
            )?)
        }
        _ => None,
    };

    if let Some(dict) = codec.dictionary() {
        writer.write_dictionary(&StoredDictionary::seal(dict.as_bytes(), key.as_ref())?)?;
    }

    let mut hasher = match &key {
        Some(k) => blake3::Hasher::new_keyed(k.checksum_key()),
        None => blake3::Hasher::new(),
    };
    let source = blocks.by_ref().map(|block| -> Result<Vec<u8>> {
        let block = block.map_err(|e| e.at(input))?;
        hasher.update(&block.data);
        Ok(block.data)
    });

    let codec = &codec;
    let key_ref = key.as_ref();
    let mut tracker = ProgressTracker::new(total, block_count, progress);
    crate::workers::run_ordered(
        options.threads,
        source,
        move || {
            let mut compressor = codec.compressor()?;
            Ok(move |index: u64, data: Vec<u8>| -> Result<BlockRecord> {
                let raw_len = data.len() as u32;
                let (encoding, payload) = compressor.compress(data)?;
                let (seal, payload) = match key_ref {
                    Some(k) => {
                        let sealed = crypto::encrypt_block(k, index, payload)?;
                        (Some((sealed.nonce, sealed.tag)), sealed.ciphertext)
                    }
                    None => (None, payload),
                };
                Ok(BlockRecord { encoding, raw_len, seal, payload })
            })
        },
        |_, record: BlockRecord| {
            writer.write_block(&record)?;
            Ok(record.raw_len as u64)
        },
        &mut tracker,
    )?;

    let checksum = *hasher.finalize().as_bytes();
    let header = writer.header().clone();
    let (out, archive_size) = writer.finish(checksum)?;
    out.into_inner().map_err(|e| ArchiverError::from(e.into_error()))?;

    let trailer = ArchiveTrailer { checksum, original_size: total, block_count };
    Ok(ArchiveSummary { header, trailer, archive_size })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let opts = CompressionOptions::default();
        assert_eq!(opts.level, 19);
        assert_eq!(opts.block_size, 16 * 1024 * 1024);
        opts.validate().unwrap();
    }

    #[test]
    fn rejects_bad_bounds() {
        let base = CompressionOptions { threads: 2, ..Default::default() };
        for bad in [
            CompressionOptions { level: 0, ..base.clone() },
            CompressionOptions { level: 23, ..base.clone() },
            CompressionOptions { threads: 0, ..base.clone() },
            CompressionOptions { block_size: 100_000, ..base.clone() },
            CompressionOptions { block_size: 32 * 1024, ..base.clone() },
            CompressionOptions { dictionary_size: 2 * 1024 * 1024, ..base.clone() },
            CompressionOptions { use_encryption: true, ..base.clone() },
            CompressionOptions { use_encryption: true, password: Some(String::new()), ..base.clone() },
            CompressionOptions { password: Some("pw".into()), ..base.clone() },
            CompressionOptions { use_steganography: true, ..base.clone() },
        ] {
            assert!(matches!(bad.validate(), Err(ArchiverError::Validation(_))), "{:?}", bad);
        }
    }

    #[test]
    fn validation_happens_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.ntk");
        let opts = CompressionOptions { use_encryption: true, ..Default::default() };
        let err = compress(&dir.path().join("does-not-exist"), &out, &opts, None).unwrap_err();
        assert!(matches!(err, ArchiverError::Validation(_)));
        assert!(!out.exists());
    }

    #[test]
    fn options_from_json() {
        let opts: CompressionOptions =
            serde_json::from_str(r#"{"level": 5, "block_size": 1048576, "kdf": {"algorithm": "pbkdf2", "memory_kib": 0, "iterations": 100000, "lanes": 1}}"#)
                .unwrap();
        assert_eq!(opts.level, 5);
        assert_eq!(opts.block_size, 1 << 20);
        assert_eq!(opts.dictionary_size, DEFAULT_DICTIONARY_SIZE);
        assert_eq!(opts.kdf, KdfParams::pbkdf2());
        opts.validate().unwrap();
    }

    #[test]
    fn missing_input_is_io_error_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.bin");
        let err = compress(&missing, &dir.path().join("o.ntk"), &CompressionOptions::default(), None).unwrap_err();
        assert!(matches!(err, ArchiverError::Io { ref path, .. } if path == &missing));
    }
}
