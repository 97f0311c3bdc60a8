//! Fixed-size block partitioning of a byte source and its in-order inverse.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::{ArchiverError, Result};

/// Number of blocks a stream of `total` bytes splits into. An empty stream is one empty block.
pub fn block_count(total: u64, block_size: u32) -> u64 {
    if total == 0 || block_size == 0 {
        1
    } else {
        total.div_ceil(block_size as u64)
    }
}

/// Expected length of block `index` in a stream of `total` bytes.
pub fn block_len(total: u64, block_size: u32, index: u64) -> usize {
    let start = index.saturating_mul(block_size as u64);
    total.saturating_sub(start).min(block_size as u64) as usize
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: u64,
    pub data: Vec<u8>,
}

/// Lazily reads `block_count(total, block_size)` blocks from `reader`.
///
/// The total length is fixed up front so every block but the last is exactly
/// `block_size` long. A source that ends early yields an `UnexpectedEof` error.
pub struct BlockSplitter<R> {
    reader: R,
    block_size: u32,
    total: u64,
    next: u64,
    count: u64,
}

impl<R: Read> BlockSplitter<R> {
    pub fn new(reader: R, block_size: u32, total: u64) -> Self {
        Self {
            reader,
            block_size,
            total,
            next: 0,
            count: block_count(total, block_size),
        }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    fn read_block(&mut self, index: u64) -> io::Result<Block> {
        let len = block_len(self.total, self.block_size, index);
        let mut data = vec![0u8; len];
        self.reader.read_exact(&mut data)?;
        Ok(Block { index, data })
    }
}

impl<R: Read + Seek> BlockSplitter<R> {
    /// Rewind the source and start the sequence over from block 0.
    pub fn restart(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.next = 0;
        Ok(())
    }
}

impl<R: Read> Iterator for BlockSplitter<R> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }
        let index = self.next;
        self.next += 1;
        match self.read_block(index) {
            Ok(block) => Some(Ok(block)),
            Err(e) => {
                // A failed read leaves the source at an unknown offset.
                self.next = self.count;
                Some(Err(e.into()))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.count - self.next) as usize;
        (left, Some(left))
    }
}

/// Concatenates blocks back into a stream, strictly in index order.
pub struct BlockAssembler<W> {
    writer: W,
    next: u64,
    written: u64,
}

impl<W: Write> BlockAssembler<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, next: 0, written: 0 }
    }

    /// Append block `index`. Anything other than the next expected index is an integrity failure.
    pub fn push(&mut self, index: u64, data: &[u8]) -> Result<()> {
        if index != self.next {
            return Err(ArchiverError::Integrity(format!(
                "block {} arrived while expecting block {}",
                index, self.next
            )));
        }
        self.writer.write_all(data)?;
        self.next += 1;
        self.written += data.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
