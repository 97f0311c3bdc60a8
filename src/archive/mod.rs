//! # Container Format
//!
//! This module defines the on-disk layout of a `.ntk` archive and the streaming
//! reader and writer for it. All integers are little-endian.
//!
//! ```text
//! header      magic "NTKARC", version, flags, level, block size, block count,
//!             original size, created_at, name, [KDF section], header CRC-32
//! dictionary  [present if flagged] length, tag or CRC-32, bytes
//! blocks      block_count records: encoding, raw_len, payload_len,
//!             nonce + tag or payload CRC-32, record CRC-32, payload
//! trailer     checksum, original size, block count, magic "NTKTRAIL"   (56 bytes)
//! ```
//!
//! Readers check the magic, then the version, then the header CRC, then field
//! consistency, before any other field is trusted. A record's CRC covers every
//! record byte before it and is checked before its lengths are used. Plain
//! archives checksum the dictionary and each payload; encrypted ones rely on
//! the AEAD tag.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::codec::BlockEncoding;
use crate::crypto::{self, ArchiveKey, KdfAlgorithm, KdfParams, NONCE_SIZE, SALT_SIZE, TAG_SIZE};
use crate::splitter;
use crate::{ArchiverError, Result};

pub const MAGIC: &[u8; 6] = b"NTKARC";
pub const TRAILER_MAGIC: &[u8; 8] = b"NTKTRAIL";

pub const FORMAT_VERSION: u16 = 1;
pub const MIN_SUPPORTED_VERSION: u16 = 1;
pub const MAX_SUPPORTED_VERSION: u16 = 1;

pub const TRAILER_SIZE: u64 = 56;
pub const MAX_NAME_LEN: usize = 4096;
pub const MAX_DICTIONARY_SIZE: usize = 1024 * 1024;
pub const MIN_BLOCK_SIZE: u32 = 64 * 1024;
pub const MAX_BLOCK_SIZE: u32 = 64 * 1024 * 1024;

/// Largest record frame: fixed fields, nonce and tag, frame CRC.
const RECORD_FRAME_MAX: usize = 9 + NONCE_SIZE + TAG_SIZE + 4;

const FLAG_ENCRYPTED: u8 = 0b01;
const FLAG_DICTIONARY: u8 = 0b10;
const KNOWN_FLAGS: u8 = FLAG_ENCRYPTED | FLAG_DICTIONARY;

/// Key-derivation inputs stored in the header of an encrypted archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherHeader {
    pub kdf: KdfParams,
    pub salt: [u8; SALT_SIZE],
    pub base_nonce: [u8; NONCE_SIZE],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u16,
    pub level: u8,
    pub block_size: u32,
    pub block_count: u64,
    pub original_size: u64,
    pub created_at: DateTime<Utc>,
    /// Original file name, without any directory part.
    pub name: String,
    pub has_dictionary: bool,
    pub cipher: Option<CipherHeader>,
}

impl ContainerHeader {
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.cipher.is_some() {
            flags |= FLAG_ENCRYPTED;
        }
        if self.has_dictionary {
            flags |= FLAG_DICTIONARY;
        }
        flags
    }

    /// Serialize the header, CRC included.
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.check()?;
        let name = self.name.as_bytes();
        let mut buf = Vec::with_capacity(64 + name.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.push(self.flags());
        buf.push(self.level);
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&self.block_count.to_le_bytes());
        buf.extend_from_slice(&self.original_size.to_le_bytes());
        buf.extend_from_slice(&self.created_at.timestamp().to_le_bytes());
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(name);
        if let Some(cipher) = &self.cipher {
            buf.push(cipher.kdf.algorithm.id());
            buf.extend_from_slice(&cipher.kdf.memory_kib.to_le_bytes());
            buf.extend_from_slice(&cipher.kdf.iterations.to_le_bytes());
            buf.extend_from_slice(&cipher.kdf.lanes.to_le_bytes());
            buf.extend_from_slice(&cipher.salt);
            buf.extend_from_slice(&cipher.base_nonce);
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(buf)
    }

    /// Parse a header from the start of `reader`. Returns the header and its exact bytes.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<(Self, Vec<u8>)> {
        let mut magic = [0u8; 6];
        if read_full(reader, &mut magic)? < magic.len() || &magic != MAGIC {
            return Err(ArchiverError::NotAnArchive);
        }
        let mut h = HeaderBytes { inner: reader, raw: magic.to_vec() };
        let truncated = |e: io::Error| eof_as(e, "header");

        let version = h.u16().map_err(truncated)?;
        if !(MIN_SUPPORTED_VERSION..=MAX_SUPPORTED_VERSION).contains(&version) {
            return Err(ArchiverError::UnsupportedVersion {
                found: version,
                min: MIN_SUPPORTED_VERSION,
                max: MAX_SUPPORTED_VERSION,
            });
        }

        let flags = h.u8().map_err(truncated)?;
        let level = h.u8().map_err(truncated)?;
        let block_size = h.u32().map_err(truncated)?;
        let block_count = h.u64().map_err(truncated)?;
        let original_size = h.u64().map_err(truncated)?;
        let created_at = h.i64().map_err(truncated)?;
        let name_len = h.u16().map_err(truncated)? as usize;
        let name = h.vec(name_len).map_err(truncated)?;
        let kdf_section = if flags & FLAG_ENCRYPTED != 0 {
            let id = h.u8().map_err(truncated)?;
            let memory_kib = h.u32().map_err(truncated)?;
            let iterations = h.u32().map_err(truncated)?;
            let lanes = h.u32().map_err(truncated)?;
            let salt = h.array::<SALT_SIZE>().map_err(truncated)?;
            let base_nonce = h.array::<NONCE_SIZE>().map_err(truncated)?;
            Some((id, memory_kib, iterations, lanes, salt, base_nonce))
        } else {
            None
        };

        let computed = crc32fast::hash(&h.raw);
        let stored = h.u32().map_err(truncated)?;
        if computed != stored {
            return Err(ArchiverError::CorruptHeader(format!(
                "header checksum mismatch (stored {:08x}, computed {:08x})",
                stored, computed
            )));
        }

        if flags & !KNOWN_FLAGS != 0 {
            return Err(corrupt(format!("unknown flag bits {:#04x}", flags)));
        }
        let created_at = DateTime::<Utc>::from_timestamp(created_at, 0)
            .ok_or_else(|| corrupt(format!("creation time {} out of range", created_at)))?;
        let name = String::from_utf8(name).map_err(|_| corrupt("file name is not UTF-8"))?;
        let cipher = match kdf_section {
            Some((id, memory_kib, iterations, lanes, salt, base_nonce)) => {
                let algorithm =
                    KdfAlgorithm::from_id(id).ok_or_else(|| corrupt(format!("unknown KDF id {}", id)))?;
                let kdf = KdfParams { algorithm, memory_kib, iterations, lanes };
                Some(CipherHeader { kdf, salt, base_nonce })
            }
            None => None,
        };

        let header = ContainerHeader {
            version,
            level,
            block_size,
            block_count,
            original_size,
            created_at,
            name,
            has_dictionary: flags & FLAG_DICTIONARY != 0,
            cipher,
        };
        header.check()?;
        Ok((header, h.raw))
    }

    fn check(&self) -> Result<()> {
        if !(1..=22).contains(&self.level) {
            return Err(corrupt(format!("compression level {} out of range", self.level)));
        }
        if !self.block_size.is_power_of_two() || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return Err(corrupt(format!("invalid block size {}", self.block_size)));
        }
        let expected = splitter::block_count(self.original_size, self.block_size);
        if self.block_count != expected {
            return Err(corrupt(format!(
                "block count {} does not match {} bytes in {}-byte blocks",
                self.block_count, self.original_size, self.block_size
            )));
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(corrupt(format!("file name of {} bytes is too long", self.name.len())));
        }
        if self.name.contains(['/', '\\', '\0']) || self.name == "." || self.name == ".." {
            return Err(corrupt(format!("file name {:?} is not a plain file name", self.name)));
        }
        if let Some(cipher) = &self.cipher {
            cipher.kdf.validate().map_err(corrupt)?;
        }
        Ok(())
    }
}

fn corrupt(msg: impl Into<String>) -> ArchiverError {
    ArchiverError::CorruptHeader(msg.into())
}

fn eof_as(e: io::Error, what: &'static str) -> ArchiverError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ArchiverError::Truncated(what)
    } else {
        ArchiverError::from(e)
    }
}

/// Read until `buf` is full or EOF. Returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Reads header fields while keeping a copy of every byte for the CRC and digest.
struct HeaderBytes<'r, R> {
    inner: &'r mut R,
    raw: Vec<u8>,
}

impl<R: Read> HeaderBytes<'_, R> {
    fn array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut b = [0u8; N];
        self.inner.read_exact(&mut b)?;
        self.raw.extend_from_slice(&b);
        Ok(b)
    }

    fn vec(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut b = vec![0u8; n];
        self.inner.read_exact(&mut b)?;
        self.raw.extend_from_slice(&b);
        Ok(b)
    }

    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> io::Result<u16> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> io::Result<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> io::Result<u64> {
        self.array().map(u64::from_le_bytes)
    }

    fn i64(&mut self) -> io::Result<i64> {
        self.array().map(i64::from_le_bytes)
    }
}

/// BLAKE3 digest of the encoded header; bound into every block's AEAD.
pub fn header_digest(header_bytes: &[u8]) -> [u8; 32] {
    *blake3::hash(header_bytes).as_bytes()
}

/// The archive-wide dictionary as stored, sealed when the archive is encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDictionary {
    pub tag: Option<[u8; TAG_SIZE]>,
    pub bytes: Vec<u8>,
}

impl StoredDictionary {
    pub fn seal(dictionary: &[u8], key: Option<&ArchiveKey>) -> Result<Self> {
        match key {
            Some(key) => {
                let sealed = crypto::encrypt_block(key, crypto::DICTIONARY_COUNTER, dictionary.to_vec())?;
                Ok(Self { tag: Some(sealed.tag), bytes: sealed.ciphertext })
            }
            None => Ok(Self { tag: None, bytes: dictionary.to_vec() }),
        }
    }

    pub fn open(self, key: Option<&ArchiveKey>) -> Result<Vec<u8>> {
        match (key, self.tag) {
            (Some(key), Some(tag)) => {
                let nonce = key.nonce_for(crypto::DICTIONARY_COUNTER);
                crypto::decrypt_block(key, crypto::DICTIONARY_COUNTER, &nonce, self.bytes, &tag)
            }
            (None, None) => Ok(self.bytes),
            (None, Some(_)) => Err(ArchiverError::PasswordRequired),
            (Some(_), None) => Err(ArchiverError::Authentication),
        }
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<u64> {
        w.write_all(&(self.bytes.len() as u32).to_le_bytes())?;
        let n = match &self.tag {
            Some(tag) => {
                w.write_all(tag)?;
                4 + TAG_SIZE as u64
            }
            None => {
                w.write_all(&crc32fast::hash(&self.bytes).to_le_bytes())?;
                8
            }
        };
        w.write_all(&self.bytes)?;
        Ok(n + self.bytes.len() as u64)
    }

    fn read_from<R: Read>(r: &mut R, encrypted: bool) -> Result<Self> {
        let truncated = |e: io::Error| eof_as(e, "dictionary");
        let mut len = [0u8; 4];
        r.read_exact(&mut len).map_err(truncated)?;
        let len = u32::from_le_bytes(len) as usize;
        if len == 0 || len > MAX_DICTIONARY_SIZE {
            return Err(corrupt(format!("dictionary length {} out of range", len)));
        }
        if encrypted {
            let mut tag = [0u8; TAG_SIZE];
            r.read_exact(&mut tag).map_err(truncated)?;
            let mut bytes = vec![0u8; len];
            r.read_exact(&mut bytes).map_err(truncated)?;
            return Ok(Self { tag: Some(tag), bytes });
        }
        let mut crc = [0u8; 4];
        r.read_exact(&mut crc).map_err(truncated)?;
        let mut bytes = vec![0u8; len];
        r.read_exact(&mut bytes).map_err(truncated)?;
        if crc32fast::hash(&bytes) != u32::from_le_bytes(crc) {
            return Err(ArchiverError::Integrity("dictionary checksum mismatch".into()));
        }
        Ok(Self { tag: None, bytes })
    }
}

/// One block as stored in the container. The block index is its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub encoding: BlockEncoding,
    pub raw_len: u32,
    /// Nonce and tag, present in encrypted archives.
    pub seal: Option<([u8; NONCE_SIZE], [u8; TAG_SIZE])>,
    pub payload: Vec<u8>,
}

impl BlockRecord {
    /// Everything between the start of the record and its payload.
    fn frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(RECORD_FRAME_MAX);
        frame.push(self.encoding as u8);
        frame.extend_from_slice(&self.raw_len.to_le_bytes());
        frame.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        match &self.seal {
            Some((nonce, tag)) => {
                frame.extend_from_slice(nonce);
                frame.extend_from_slice(tag);
            }
            None => frame.extend_from_slice(&crc32fast::hash(&self.payload).to_le_bytes()),
        }
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<u64> {
        let frame = self.frame();
        w.write_all(&frame)?;
        w.write_all(&self.payload)?;
        Ok((frame.len() + self.payload.len()) as u64)
    }

    /// Read one record. The frame CRC and the lengths are checked before the
    /// payload is allocated.
    pub fn read_from<R: Read>(r: &mut R, encrypted: bool, block_size: u32) -> Result<Self> {
        let truncated = |e: io::Error| eof_as(e, "block records");
        let mut frame = [0u8; RECORD_FRAME_MAX];
        let frame_len = if encrypted { 9 + NONCE_SIZE + TAG_SIZE + 4 } else { 9 + 4 + 4 };
        let frame = &mut frame[..frame_len];
        r.read_exact(frame).map_err(truncated)?;

        let (covered, crc) = frame.split_at(frame_len - 4);
        if crc32fast::hash(covered) != u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]) {
            return Err(ArchiverError::Integrity("block record frame checksum mismatch".into()));
        }
        let encoding = BlockEncoding::from_u8(covered[0])
            .ok_or_else(|| ArchiverError::Integrity(format!("unknown block encoding {}", covered[0])))?;
        let raw_len = u32::from_le_bytes([covered[1], covered[2], covered[3], covered[4]]);
        let payload_len = u32::from_le_bytes([covered[5], covered[6], covered[7], covered[8]]);
        if raw_len > block_size || payload_len > block_size {
            return Err(ArchiverError::Integrity(format!(
                "block record lengths {}/{} exceed block size {}",
                raw_len, payload_len, block_size
            )));
        }

        let mut payload = vec![0u8; payload_len as usize];
        r.read_exact(&mut payload).map_err(truncated)?;
        let rest = &covered[9..];
        let seal = if encrypted {
            let mut nonce = [0u8; NONCE_SIZE];
            let mut tag = [0u8; TAG_SIZE];
            nonce.copy_from_slice(&rest[..NONCE_SIZE]);
            tag.copy_from_slice(&rest[NONCE_SIZE..]);
            Some((nonce, tag))
        } else {
            if crc32fast::hash(&payload) != u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) {
                return Err(ArchiverError::Integrity("block payload checksum mismatch".into()));
            }
            None
        };
        Ok(Self { encoding, raw_len, seal, payload })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveTrailer {
    /// BLAKE3 of the original bytes; keyed with the archive's checksum key when encrypted.
    pub checksum: [u8; 32],
    pub original_size: u64,
    pub block_count: u64,
}

impl ArchiveTrailer {
    pub fn encode(&self) -> [u8; TRAILER_SIZE as usize] {
        let mut buf = [0u8; TRAILER_SIZE as usize];
        buf[..32].copy_from_slice(&self.checksum);
        buf[32..40].copy_from_slice(&self.original_size.to_le_bytes());
        buf[40..48].copy_from_slice(&self.block_count.to_le_bytes());
        buf[48..].copy_from_slice(TRAILER_MAGIC);
        buf
    }

    pub fn decode(buf: &[u8; TRAILER_SIZE as usize]) -> Result<Self> {
        if &buf[48..] != TRAILER_MAGIC {
            return Err(ArchiverError::Truncated("archive trailer missing"));
        }
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&buf[..32]);
        let mut word = [0u8; 8];
        word.copy_from_slice(&buf[32..40]);
        let original_size = u64::from_le_bytes(word);
        word.copy_from_slice(&buf[40..48]);
        let block_count = u64::from_le_bytes(word);
        Ok(Self { checksum, original_size, block_count })
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut buf = [0u8; TRAILER_SIZE as usize];
        r.read_exact(&mut buf).map_err(|e| eof_as(e, "archive trailer missing"))?;
        Self::decode(&buf)
    }

    /// Read the fixed-size trailer from the end of a seekable stream.
    pub fn read_at_eof<R: Read + Seek>(r: &mut R) -> Result<Self> {
        let len = r.seek(SeekFrom::End(0))?;
        if len < TRAILER_SIZE {
            return Err(ArchiverError::Truncated("archive trailer missing"));
        }
        r.seek(SeekFrom::Start(len - TRAILER_SIZE))?;
        Self::read_from(r)
    }

    pub fn matches(&self, header: &ContainerHeader) -> Result<()> {
        if self.original_size != header.original_size || self.block_count != header.block_count {
            return Err(corrupt(format!(
                "trailer records {} bytes in {} blocks, header records {} bytes in {} blocks",
                self.original_size, self.block_count, header.original_size, header.block_count
            )));
        }
        Ok(())
    }
}

/// Streams a container: header on construction, then the optional dictionary,
/// then exactly `block_count` records, then the trailer.
pub struct ArchiveWriter<W: Write> {
    writer: W,
    header: ContainerHeader,
    digest: [u8; 32],
    written: u64,
    blocks: u64,
    dictionary_written: bool,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(mut writer: W, header: ContainerHeader) -> Result<Self> {
        let bytes = header.encode()?;
        writer.write_all(&bytes)?;
        Ok(Self {
            writer,
            digest: header_digest(&bytes),
            written: bytes.len() as u64,
            header,
            blocks: 0,
            dictionary_written: false,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn header_digest(&self) -> [u8; 32] {
        self.digest
    }

    pub fn write_dictionary(&mut self, dictionary: &StoredDictionary) -> Result<()> {
        if !self.header.has_dictionary || self.dictionary_written || self.blocks > 0 {
            return Err(ArchiverError::Validation("dictionary written out of place".into()));
        }
        if dictionary.bytes.len() > MAX_DICTIONARY_SIZE {
            return Err(ArchiverError::Validation("dictionary too large".into()));
        }
        self.written += dictionary.write_to(&mut self.writer)?;
        self.dictionary_written = true;
        Ok(())
    }

    pub fn write_block(&mut self, record: &BlockRecord) -> Result<u64> {
        if self.header.has_dictionary && !self.dictionary_written {
            return Err(ArchiverError::Validation("dictionary must precede block records".into()));
        }
        if self.blocks >= self.header.block_count {
            return Err(ArchiverError::Integrity("more blocks than the header declares".into()));
        }
        if record.seal.is_some() != self.header.is_encrypted() {
            return Err(ArchiverError::Integrity("block seal does not match archive encryption".into()));
        }
        let n = record.write_to(&mut self.writer)?;
        self.written += n;
        self.blocks += 1;
        Ok(n)
    }

    /// Write the trailer and flush. Returns the inner writer and the total archive size.
    pub fn finish(mut self, checksum: [u8; 32]) -> Result<(W, u64)> {
        if self.blocks != self.header.block_count {
            return Err(ArchiverError::Integrity(format!(
                "wrote {} of {} blocks",
                self.blocks, self.header.block_count
            )));
        }
        let trailer = ArchiveTrailer {
            checksum,
            original_size: self.header.original_size,
            block_count: self.header.block_count,
        };
        self.writer.write_all(&trailer.encode())?;
        self.writer.flush()?;
        Ok((self.writer, self.written + TRAILER_SIZE))
    }
}

/// Sequential reader for a full decode. `open` parses the header and the
/// dictionary section; records are then pulled one at a time.
pub struct ArchiveReader<R: Read> {
    reader: R,
    header: ContainerHeader,
    digest: [u8; 32],
    dictionary: Option<StoredDictionary>,
    next_block: u64,
}

impl<R: Read> ArchiveReader<R> {
    pub fn open(mut reader: R) -> Result<Self> {
        let (header, raw) = ContainerHeader::read_from(&mut reader)?;
        let dictionary = if header.has_dictionary {
            Some(StoredDictionary::read_from(&mut reader, header.is_encrypted())?)
        } else {
            None
        };
        Ok(Self {
            reader,
            digest: header_digest(&raw),
            header,
            dictionary,
            next_block: 0,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn header_digest(&self) -> [u8; 32] {
        self.digest
    }

    pub fn take_dictionary(&mut self) -> Option<StoredDictionary> {
        self.dictionary.take()
    }

    /// The next record, or `None` once all declared blocks have been read.
    pub fn next_record(&mut self) -> Result<Option<BlockRecord>> {
        if self.next_block >= self.header.block_count {
            return Ok(None);
        }
        let record = BlockRecord::read_from(&mut self.reader, self.header.is_encrypted(), self.header.block_size)?;
        self.next_block += 1;
        Ok(Some(record))
    }

    /// Read the trailer after the last record and reject anything following it.
    pub fn finish(mut self) -> Result<ArchiveTrailer> {
        if self.next_block != self.header.block_count {
            return Err(ArchiverError::Integrity("trailer read before all blocks".into()));
        }
        let trailer = ArchiveTrailer::read_from(&mut self.reader)?;
        trailer.matches(&self.header)?;
        let mut extra = [0u8; 1];
        if read_full(&mut self.reader, &mut extra)? != 0 {
            return Err(corrupt("unexpected data after archive trailer"));
        }
        Ok(trailer)
    }
}

/// Header and trailer of an archive file, read without touching block payloads.
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub header: ContainerHeader,
    pub trailer: ArchiveTrailer,
    pub archive_size: u64,
}

/// Read only the header prefix and the fixed-size trailer of `path`.
pub fn read_metadata(path: &Path) -> Result<ArchiveSummary> {
    let file = File::open(path).map_err(|e| ArchiverError::io(e, path))?;
    let mut reader = BufReader::with_capacity(8 * 1024, file);
    read_summary(&mut reader).map_err(|e| e.at(path))
}

pub fn read_summary<R: Read + Seek>(reader: &mut R) -> Result<ArchiveSummary> {
    let (header, raw) = ContainerHeader::read_from(reader)?;
    let trailer = ArchiveTrailer::read_at_eof(reader)?;
    let archive_size = reader.seek(SeekFrom::End(0))?;
    if archive_size < raw.len() as u64 + TRAILER_SIZE {
        return Err(ArchiverError::Truncated("archive trailer missing"));
    }
    trailer.matches(&header)?;
    Ok(ArchiveSummary { header, trailer, archive_size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header(original_size: u64, cipher: Option<CipherHeader>) -> ContainerHeader {
        ContainerHeader {
            version: FORMAT_VERSION,
            level: 19,
            block_size: MIN_BLOCK_SIZE,
            block_count: splitter::block_count(original_size, MIN_BLOCK_SIZE),
            original_size,
            created_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            name: "report.txt".into(),
            has_dictionary: false,
            cipher,
        }
    }

    fn cipher() -> CipherHeader {
        CipherHeader {
            kdf: KdfParams { algorithm: KdfAlgorithm::Pbkdf2, memory_kib: 0, iterations: 10_000, lanes: 1 },
            salt: [5; SALT_SIZE],
            base_nonce: [6; NONCE_SIZE],
        }
    }

    fn small_archive() -> Vec<u8> {
        let mut w = ArchiveWriter::new(Vec::new(), header(3, None)).unwrap();
        w.write_block(&BlockRecord {
            encoding: BlockEncoding::Stored,
            raw_len: 3,
            seal: None,
            payload: b"abc".to_vec(),
        })
        .unwrap();
        let (bytes, total) = w.finish([1; 32]).unwrap();
        assert_eq!(total, bytes.len() as u64);
        bytes
    }

    #[test]
    fn header_parses_back() {
        for h in [header(0, None), header(1 << 20, Some(cipher()))] {
            let bytes = h.encode().unwrap();
            let (parsed, raw) = ContainerHeader::read_from(&mut Cursor::new(&bytes)).unwrap();
            assert_eq!(parsed, h);
            assert_eq!(raw, bytes);
        }
    }

    #[test]
    fn validation_order() {
        let mut bytes = header(10, None).encode().unwrap();

        assert!(matches!(
            ContainerHeader::read_from(&mut Cursor::new(&bytes[..4])),
            Err(ArchiverError::NotAnArchive)
        ));
        assert!(matches!(
            ContainerHeader::read_from(&mut Cursor::new(b"PK\x03\x04 not ours".to_vec())),
            Err(ArchiverError::NotAnArchive)
        ));
        assert!(matches!(
            ContainerHeader::read_from(&mut Cursor::new(&bytes[..20])),
            Err(ArchiverError::Truncated(_))
        ));

        bytes[6] = 9;
        assert!(matches!(
            ContainerHeader::read_from(&mut Cursor::new(&bytes)),
            Err(ArchiverError::UnsupportedVersion { found: 9, .. })
        ));
        bytes[6] = 1;
        bytes[10] ^= 1;
        assert!(matches!(
            ContainerHeader::read_from(&mut Cursor::new(&bytes)),
            Err(ArchiverError::CorruptHeader(_))
        ));
    }

    #[test]
    fn inconsistent_block_count_rejected() {
        let mut h = header(10, None);
        h.block_count = 2;
        assert!(matches!(h.encode(), Err(ArchiverError::CorruptHeader(_))));
    }

    #[test]
    fn summary_reads_header_and_trailer() {
        let bytes = small_archive();
        let summary = read_summary(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(summary.header.original_size, 3);
        assert_eq!(summary.trailer.checksum, [1; 32]);
        assert_eq!(summary.archive_size, bytes.len() as u64);

        let cut = &bytes[..bytes.len() - 10];
        assert!(matches!(read_summary(&mut Cursor::new(cut)), Err(ArchiverError::Truncated(_))));
    }

    #[test]
    fn reader_walks_records_and_rejects_trailing_bytes() {
        let bytes = small_archive();
        let mut r = ArchiveReader::open(Cursor::new(&bytes)).unwrap();
        let rec = r.next_record().unwrap().unwrap();
        assert_eq!(rec.payload, b"abc");
        assert!(r.next_record().unwrap().is_none());
        r.finish().unwrap();

        let mut longer = bytes.clone();
        longer.push(0);
        let mut r = ArchiveReader::open(Cursor::new(&longer)).unwrap();
        r.next_record().unwrap();
        assert!(matches!(r.finish(), Err(ArchiverError::CorruptHeader(_))));

        let cut = &bytes[..bytes.len() - TRAILER_SIZE as usize - 1];
        let mut r = ArchiveReader::open(Cursor::new(cut)).unwrap();
        assert!(matches!(r.next_record(), Err(ArchiverError::Truncated(_))));
    }

    #[test]
    fn writer_enforces_declared_count() {
        let w = ArchiveWriter::new(Vec::new(), header(3, None)).unwrap();
        assert!(w.finish([0; 32]).is_err());
    }

    #[test]
    fn oversized_record_rejected_before_allocation() {
        let mut rec = Vec::new();
        rec.push(0u8);
        rec.extend_from_slice(&10u32.to_le_bytes());
        rec.extend_from_slice(&u32::MAX.to_le_bytes());
        rec.extend_from_slice(&0u32.to_le_bytes());
        let crc = crc32fast::hash(&rec);
        rec.extend_from_slice(&crc.to_le_bytes());
        let err = BlockRecord::read_from(&mut Cursor::new(rec), false, MIN_BLOCK_SIZE).unwrap_err();
        assert!(matches!(err, ArchiverError::Integrity(ref m) if m.contains("exceed")), "{:?}", err);
    }

    fn encoded(record: &BlockRecord) -> Vec<u8> {
        let mut bytes = Vec::new();
        record.write_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn every_flipped_record_byte_is_an_integrity_error() {
        let plain = BlockRecord {
            encoding: BlockEncoding::Zstd,
            raw_len: 900,
            seal: None,
            payload: (0..200u8).collect(),
        };
        let sealed = BlockRecord { seal: Some(([3; NONCE_SIZE], [4; TAG_SIZE])), ..plain.clone() };
        let bytes = encoded(&plain);
        assert_eq!(BlockRecord::read_from(&mut Cursor::new(&bytes), false, MIN_BLOCK_SIZE).unwrap(), plain);

        for i in 0..bytes.len() {
            for bit in [0x01u8, 0x10, 0x80] {
                let mut damaged = bytes.clone();
                damaged[i] ^= bit;
                let err = BlockRecord::read_from(&mut Cursor::new(&damaged), false, MIN_BLOCK_SIZE).unwrap_err();
                assert!(matches!(err, ArchiverError::Integrity(_)), "byte {} bit {:#x}: {:?}", i, bit, err);
            }
        }

        // Sealed payloads are left to the AEAD tag; only the frame is checked here.
        let bytes = encoded(&sealed);
        let frame_len = bytes.len() - sealed.payload.len();
        assert_eq!(BlockRecord::read_from(&mut Cursor::new(&bytes), true, MIN_BLOCK_SIZE).unwrap(), sealed);
        for i in 0..frame_len {
            let mut damaged = bytes.clone();
            damaged[i] ^= 0x04;
            let err = BlockRecord::read_from(&mut Cursor::new(&damaged), true, MIN_BLOCK_SIZE).unwrap_err();
            assert!(matches!(err, ArchiverError::Integrity(_)), "byte {}: {:?}", i, err);
        }
    }

    #[test]
    fn plain_dictionary_is_checksummed() {
        let dict = StoredDictionary::seal(b"dictionary bytes", None).unwrap();
        let mut bytes = Vec::new();
        dict.write_to(&mut bytes).unwrap();
        assert_eq!(StoredDictionary::read_from(&mut Cursor::new(&bytes), false).unwrap(), dict);

        let last = bytes.len() - 1;
        bytes[last] ^= 0x20;
        assert!(matches!(
            StoredDictionary::read_from(&mut Cursor::new(&bytes), false),
            Err(ArchiverError::Integrity(_))
        ));
    }
}
