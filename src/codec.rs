//! Per-block Zstandard codec with an optional archive-wide dictionary.
//!
//! Blocks that do not shrink are kept verbatim and flagged [`BlockEncoding::Stored`],
//! so incompressible input never grows by more than the record framing.

use std::io::{Read, Seek, SeekFrom};

use zstd::bulk::{Compressor, Decompressor};
use zstd::dict::{DecoderDictionary, EncoderDictionary};
use zstd::zstd_safe::CParameter;

use crate::{ArchiverError, Result};

pub const MIN_LEVEL: i32 = 1;
pub const MAX_LEVEL: i32 = 22;

/// Bytes read per dictionary training sample.
const SAMPLE_SIZE: usize = 8 * 1024;
const MAX_SAMPLES: u64 = 128;
/// Below this many blocks a dictionary costs more than it saves.
pub const MIN_BLOCKS_FOR_DICTIONARY: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockEncoding {
    Zstd = 0,
    Stored = 1,
}

impl BlockEncoding {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(BlockEncoding::Zstd),
            1 => Some(BlockEncoding::Stored),
            _ => None,
        }
    }
}

/// Dictionary bytes plus the prepared zstd tables, built once per archive
/// and borrowed read-only by every worker.
pub struct SharedDictionary {
    raw: Vec<u8>,
    encoder: EncoderDictionary<'static>,
    decoder: DecoderDictionary<'static>,
}

impl SharedDictionary {
    pub fn new(raw: Vec<u8>, level: i32) -> Self {
        let encoder = EncoderDictionary::copy(&raw, level);
        let decoder = DecoderDictionary::copy(&raw);
        Self { raw, encoder, decoder }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

impl std::fmt::Debug for SharedDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDictionary").field("len", &self.raw.len()).finish()
    }
}

/// Archive-wide codec settings. Workers each open their own
/// [`BlockCompressor`] / [`BlockDecompressor`] from a shared reference.
#[derive(Debug)]
pub struct BlockCodec {
    level: i32,
    dictionary: Option<SharedDictionary>,
}

impl BlockCodec {
    pub fn new(level: i32, dictionary: Option<Vec<u8>>) -> Self {
        let dictionary = dictionary
            .filter(|d| !d.is_empty())
            .map(|d| SharedDictionary::new(d, level));
        Self { level, dictionary }
    }

    pub fn dictionary(&self) -> Option<&SharedDictionary> {
        self.dictionary.as_ref()
    }

    pub fn compressor(&self) -> Result<BlockCompressor<'_>> {
        let mut inner = match &self.dictionary {
            Some(dict) => Compressor::with_prepared_dictionary(&dict.encoder)?,
            None => Compressor::new(self.level)?,
        };
        inner.set_parameter(CParameter::ChecksumFlag(true))?;
        Ok(BlockCompressor { inner })
    }

    pub fn decompressor(&self) -> Result<BlockDecompressor<'_>> {
        let inner = match &self.dictionary {
            Some(dict) => Decompressor::with_prepared_dictionary(&dict.decoder)?,
            None => Decompressor::new()?,
        };
        Ok(BlockDecompressor { inner })
    }
}

pub struct BlockCompressor<'a> {
    inner: Compressor<'a>,
}

impl BlockCompressor<'_> {
    /// Compress one block, falling back to the raw bytes when zstd does not win.
    pub fn compress(&mut self, raw: Vec<u8>) -> Result<(BlockEncoding, Vec<u8>)> {
        let packed = self.inner.compress(&raw)?;
        if packed.len() < raw.len() {
            Ok((BlockEncoding::Zstd, packed))
        } else {
            Ok((BlockEncoding::Stored, raw))
        }
    }
}

pub struct BlockDecompressor<'a> {
    inner: Decompressor<'a>,
}

impl BlockDecompressor<'_> {
    pub fn decompress(&mut self, encoding: BlockEncoding, payload: Vec<u8>, raw_len: usize) -> Result<Vec<u8>> {
        let raw = match encoding {
            BlockEncoding::Stored => payload,
            BlockEncoding::Zstd => self
                .inner
                .decompress(&payload, raw_len)
                .map_err(|e| ArchiverError::Integrity(format!("block payload does not decode: {}", e)))?,
        };
        if raw.len() != raw_len {
            return Err(ArchiverError::Integrity(format!(
                "block decoded to {} bytes, header declares {}",
                raw.len(),
                raw_len
            )));
        }
        Ok(raw)
    }
}

/// Train a dictionary from up to 128 evenly spaced 8 KiB samples of `source`.
///
/// Returns `None` when the input is too small to be worth it or training fails;
/// the archive is then written without a dictionary. The source position is
/// left unspecified, callers rewind.
pub fn train_dictionary<R: Read + Seek>(
    source: &mut R,
    total: u64,
    block_count: u64,
    max_size: usize,
) -> Result<Option<Vec<u8>>> {
    if max_size == 0 || block_count < MIN_BLOCKS_FOR_DICTIONARY || total < SAMPLE_SIZE as u64 {
        return Ok(None);
    }

    let n = (total / SAMPLE_SIZE as u64).min(MAX_SAMPLES);
    let stride = total / n;
    let mut samples = Vec::with_capacity(n as usize);
    for i in 0..n {
        source.seek(SeekFrom::Start(i * stride))?;
        let mut sample = Vec::with_capacity(SAMPLE_SIZE);
        source.by_ref().take(SAMPLE_SIZE as u64).read_to_end(&mut sample)?;
        if !sample.is_empty() {
            samples.push(sample);
        }
    }

    match zstd::dict::from_samples(&samples, max_size) {
        Ok(dict) if !dict.is_empty() => {
            tracing::debug!(samples = samples.len(), size = dict.len(), "trained dictionary");
            Ok(Some(dict))
        }
        Ok(_) => Ok(None),
        Err(e) => {
            tracing::warn!(error = %e, "dictionary training failed, continuing without one");
            Ok(None)
        }
    }
}
