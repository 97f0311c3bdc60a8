//! # Extraction Module
//!
//! Restores the original file from a `.ntk` container and reads archive
//! metadata without decoding any blocks.
//!
//! Blocks are opened (authenticated first, when encrypted) and decompressed on
//! the worker pool, then reassembled in order into a temporary file next to the
//! destination. The destination only appears once the trailer checksum and size
//! have been verified.

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::archive::{self, ArchiveReader, BlockRecord};
use crate::codec::BlockCodec;
use crate::common::FileMetadata;
use crate::crypto::{self, ArchiveKey};
use crate::fsx::{self, AtomicFile};
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::splitter::{self, BlockAssembler};
use crate::workers;
use crate::{ArchiverError, Result};

/// Worker threads used for decompression.
fn default_threads() -> usize {
    num_cpus::get().max(1)
}

/// Decompress the archive at `input` into `output`.
///
/// Fails with [`ArchiverError::PasswordRequired`] before creating anything if
/// the archive is encrypted and `password` is missing or empty. A wrong
/// password fails with [`ArchiverError::Authentication`] and leaves no output.
pub fn decompress(
    input: &Path,
    output: &Path,
    password: Option<&str>,
    progress: Option<&ProgressCallback<'_>>,
) -> Result<()> {
    decompress_with_threads(input, output, password, progress, default_threads())
}

pub fn decompress_with_threads(
    input: &Path,
    output: &Path,
    password: Option<&str>,
    progress: Option<&ProgressCallback<'_>>,
    threads: usize,
) -> Result<()> {
    let started = Instant::now();
    let (file, _) = fsx::open_with_len(input)?;
    let mut reader =
        ArchiveReader::open(BufReader::with_capacity(1024 * 1024, file)).map_err(|e| e.at(input))?;
    let header = reader.header().clone();

    let password = password.filter(|p| !p.is_empty());
    let key = match (&header.cipher, password) {
        (Some(_), None) => return Err(ArchiverError::PasswordRequired),
        (Some(cipher), Some(password)) => {
            tracing::debug!(kdf = ?cipher.kdf.algorithm, "deriving archive key");
            Some(ArchiveKey::from_password(
                password,
                &cipher.salt,
                &cipher.kdf,
                cipher.base_nonce,
                reader.header_digest(),
            )?)
        }
        (None, Some(_)) => {
            tracing::debug!("archive is not encrypted, ignoring password");
            None
        }
        (None, None) => None,
    };

    let dictionary = reader.take_dictionary().map(|d| d.open(key.as_ref())).transpose()?;
    let codec = BlockCodec::new(header.level as i32, dictionary);

    if fsx::same_file(input, output) {
        return Err(ArchiverError::Validation("input and output are the same file".into()));
    }
    let target = AtomicFile::create(output)?;
    let mut assembler = BlockAssembler::new(BufWriter::with_capacity(8 * 1024 * 1024, target.file()));
    let mut hasher = match &key {
        Some(k) => blake3::Hasher::new_keyed(k.checksum_key()),
        None => blake3::Hasher::new(),
    };

    let total = header.original_size;
    let block_size = header.block_size;
    let source = std::iter::from_fn(|| reader.next_record().map_err(|e| e.at(input)).transpose());

    let codec = &codec;
    let key_ref = key.as_ref();
    let mut tracker = ProgressTracker::new(total, header.block_count, progress);
    workers::run_ordered(
        threads,
        source,
        move || {
            let mut decompressor = codec.decompressor()?;
            Ok(move |index: u64, record: BlockRecord| -> Result<Vec<u8>> {
                let expected = splitter::block_len(total, block_size, index);
                if record.raw_len as usize != expected {
                    return Err(ArchiverError::Integrity(format!(
                        "block {} declares {} bytes, expected {}",
                        index, record.raw_len, expected
                    )));
                }
                let payload = match (key_ref, record.seal) {
                    (Some(k), Some((nonce, tag))) => crypto::decrypt_block(k, index, &nonce, record.payload, &tag)?,
                    (None, None) => record.payload,
                    _ => return Err(ArchiverError::Integrity(format!("block {} has a mismatched seal", index))),
                };
                decompressor.decompress(record.encoding, payload, expected)
            })
        },
        |index, data: Vec<u8>| {
            hasher.update(&data);
            assembler.push(index, &data).map_err(|e| e.at(output))?;
            Ok(data.len() as u64)
        },
        &mut tracker,
    )?;

    let trailer = reader.finish().map_err(|e| e.at(input))?;
    if assembler.bytes_written() != total {
        return Err(ArchiverError::Integrity(format!(
            "restored {} bytes, archive declares {}",
            assembler.bytes_written(),
            total
        )));
    }
    if *hasher.finalize().as_bytes() != trailer.checksum {
        return Err(ArchiverError::Integrity("whole-file checksum mismatch".into()));
    }

    let out = assembler.finish().map_err(|e| e.at(output))?;
    out.into_inner()
        .map_err(|e| ArchiverError::io(e.into_error(), output))?;
    target.persist()?;

    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        bytes = total,
        blocks = header.block_count,
        elapsed_s = started.elapsed().as_secs_f64(),
        "decompressed"
    );
    Ok(())
}

/// Read archive metadata from the header and trailer only.
///
/// Fails for anything that is not a container, which front ends use to tell
/// archives apart from files still to be compressed.
pub fn inspect_metadata(path: &Path) -> Result<FileMetadata> {
    let summary = archive::read_metadata(path)?;
    Ok(FileMetadata::from_summary(&summary, 0.0))
}

/// Where `decompress` should write when no destination is given: the original
/// file name from the header, next to the archive.
pub fn default_output_path(archive_path: &Path) -> Result<PathBuf> {
    let summary = archive::read_metadata(archive_path)?;
    let dir = archive_path.parent().unwrap_or_else(|| Path::new(""));
    let name = if summary.header.name.is_empty() {
        format!("{}.out", hex::encode(&summary.trailer.checksum[..4]))
    } else {
        summary.header.name
    };
    Ok(dir.join(name))
}
