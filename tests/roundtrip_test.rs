mod common;

use std::fs;

use common::*;
use ntk::{compress, decompress, inspect_metadata, ArchiverError};
use tempfile::tempdir;

fn roundtrip(data: &[u8], level: i32, block_size: u32) -> ntk::FileMetadata {
    let dir = tempdir().unwrap();
    let input = write_file(dir.path(), "input.bin", data);
    let archive = dir.path().join("input.bin.ntk");
    let restored = dir.path().join("restored.bin");

    let meta = compress(&input, &archive, &options(level, block_size), None).unwrap();
    decompress(&archive, &restored, None, None).unwrap();
    assert_eq!(fs::read(&restored).unwrap(), data, "restored bytes differ");
    meta
}

#[test]
fn empty_file() {
    let meta = roundtrip(&[], 3, BLOCK_64K);
    assert_eq!(meta.original_size, 0);
    assert_eq!(meta.block_count, 1);
    assert!(meta.compressed_size > 0);
}

#[test]
fn single_byte() {
    let meta = roundtrip(b"A", 3, BLOCK_64K);
    assert_eq!(meta.original_size, 1);
    assert_eq!(meta.block_count, 1);
}

#[test]
fn exact_block_multiple_and_partial_tail() {
    let exact = text_data(4 * BLOCK_64K as usize, 1);
    assert_eq!(roundtrip(&exact, 3, BLOCK_64K).block_count, 4);

    let ragged = text_data(4 * BLOCK_64K as usize + 17, 2);
    assert_eq!(roundtrip(&ragged, 3, BLOCK_64K).block_count, 5);
}

#[test]
fn many_blocks_with_dictionary() {
    // Enough blocks for dictionary training to kick in.
    let data = text_data(20 * BLOCK_64K as usize + 1234, 3);
    let meta = roundtrip(&data, 5, BLOCK_64K);
    assert_eq!(meta.block_count, 21);
    assert!(meta.compression_ratio > 2.0, "ratio {}", meta.compression_ratio);
}

#[test]
fn incompressible_data_is_stored() {
    let data = random_data(3 * BLOCK_64K as usize + 100, 4);
    let meta = roundtrip(&data, 3, BLOCK_64K);
    // Stored blocks plus framing: the archive is only slightly larger than the input.
    assert!(meta.compressed_size > meta.original_size);
    assert!(meta.compressed_size < meta.original_size + 1024);
}

#[test]
fn various_levels() {
    let data = text_data(300 * 1024, 5);
    for level in [1, 9, 19, 22] {
        roundtrip(&data, level, 128 * 1024);
    }
}

#[test]
fn thread_count_does_not_change_output() {
    let dir = tempdir().unwrap();
    let input = write_file(dir.path(), "data.txt", &text_data(10 * BLOCK_64K as usize, 6));
    let one = dir.path().join("one.ntk");
    let many = dir.path().join("many.ntk");
    let base = ntk::CompressionOptions { dictionary_size: 0, ..options(3, BLOCK_64K) };
    compress(&input, &one, &ntk::CompressionOptions { threads: 1, ..base.clone() }, None).unwrap();
    compress(&input, &many, &ntk::CompressionOptions { threads: 8, ..base }, None).unwrap();

    // Only the creation timestamp may differ between the two headers.
    let a = inspect_metadata(&one).unwrap();
    let b = inspect_metadata(&many).unwrap();
    assert_eq!(a.compressed_size, b.compressed_size);
    assert_eq!(a.checksum, b.checksum);
}

#[test]
fn overwrites_existing_output() {
    let dir = tempdir().unwrap();
    let input = write_file(dir.path(), "in.txt", b"fresh contents");
    let archive = write_file(dir.path(), "in.ntk", b"stale archive");
    let restored = write_file(dir.path(), "out.txt", b"stale output that is longer than the new one");

    compress(&input, &archive, &options(3, BLOCK_64K), None).unwrap();
    decompress(&archive, &restored, None, None).unwrap();
    assert_eq!(fs::read(&restored).unwrap(), b"fresh contents");
}

#[test]
fn same_input_and_output_is_rejected() {
    let dir = tempdir().unwrap();
    let input = write_file(dir.path(), "self.bin", &text_data(1000, 8));
    let err = compress(&input, &input, &options(3, BLOCK_64K), None).unwrap_err();
    assert!(matches!(err, ArchiverError::Validation(_)));
    assert_eq!(fs::read(&input).unwrap(), text_data(1000, 8));
}
