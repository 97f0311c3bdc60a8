mod common;

use std::fs;

use common::*;
use ntk::{compress, inspect_metadata, ArchiverError};
use tempfile::tempdir;

#[test]
fn metadata_matches_archive() {
    let dir = tempdir().unwrap();
    let data = text_data(500_000, 7);
    let input = write_file(dir.path(), "report.log", &data);
    let archive = dir.path().join("report.ntk");

    let meta = compress(&input, &archive, &options(9, BLOCK_64K), None).unwrap();
    let archive_len = fs::metadata(&archive).unwrap().len();
    assert_eq!(meta.original_name, "report.log");
    assert_eq!(meta.original_size, data.len() as u64);
    assert_eq!(meta.compressed_size, archive_len);
    assert!((meta.compression_ratio - data.len() as f64 / archive_len as f64).abs() < 1e-9);
    assert!(!meta.encrypted);
    assert_eq!(meta.format_version, 1);
    assert_eq!(meta.checksum.len(), 64);

    let inspected = inspect_metadata(&archive).unwrap();
    assert_eq!(inspected.original_size, meta.original_size);
    assert_eq!(inspected.compressed_size, archive_len);
    assert_eq!(inspected.checksum, meta.checksum);
    assert_eq!(inspected.creation_time, meta.creation_time);
    assert_eq!(inspected.elapsed, 0.0);
}

#[test]
fn inspect_rejects_non_archives() {
    let dir = tempdir().unwrap();
    let plain = write_file(dir.path(), "plain.txt", b"just some text, definitely not an archive");
    assert!(matches!(inspect_metadata(&plain), Err(ArchiverError::NotAnArchive)));

    let empty = write_file(dir.path(), "empty", b"");
    assert!(matches!(inspect_metadata(&empty), Err(ArchiverError::NotAnArchive)));
}

#[test]
fn encrypted_archives_inspect_without_password() {
    let dir = tempdir().unwrap();
    let data = text_data(20 * BLOCK_64K as usize, 11);
    let input = write_file(dir.path(), "vault.txt", &data);
    let archive = dir.path().join("vault.ntk");
    compress(&input, &archive, &encrypted_options(3, BLOCK_64K, "pw"), None).unwrap();

    let meta = inspect_metadata(&archive).unwrap();
    assert!(meta.encrypted);
    assert_eq!(meta.original_name, "vault.txt");
    assert_eq!(meta.original_size, data.len() as u64);
    assert_eq!(meta.compressed_size, fs::metadata(&archive).unwrap().len());
    assert_eq!(meta.block_count, 20);
    assert_eq!(meta.block_size, BLOCK_64K);
}

#[test]
fn metadata_serializes_to_json() {
    let dir = tempdir().unwrap();
    let input = write_file(dir.path(), "j.txt", b"json please");
    let archive = dir.path().join("j.ntk");
    compress(&input, &archive, &options(3, BLOCK_64K), None).unwrap();

    let value = serde_json::to_value(inspect_metadata(&archive).unwrap()).unwrap();
    assert_eq!(value["original_name"], "j.txt");
    assert_eq!(value["original_size"], 11);
    assert_eq!(value["encrypted"], false);
    assert!(value["creation_time"].is_string());
}
