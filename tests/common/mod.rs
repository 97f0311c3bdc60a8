#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use ntk::crypto::{KdfAlgorithm, KdfParams};
use ntk::CompressionOptions;
use rand::{rngs::StdRng, Rng, SeedableRng};

pub const BLOCK_64K: u32 = 64 * 1024;

/// Log-like text that compresses well but is not trivially repetitive.
pub fn text_data(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let words = ["alpha", "block", "zstd", "archive", "nonce", "stream", "delta", "worker", "index", "trailer"];
    let mut out = Vec::with_capacity(len + 64);
    let mut line = 0u64;
    while out.len() < len {
        line += 1;
        out.extend_from_slice(format!("{:08} ", line).as_bytes());
        for _ in 0..rng.gen_range(3..12) {
            out.extend_from_slice(words[rng.gen_range(0..words.len())].as_bytes());
            out.push(b' ');
        }
        out.extend_from_slice(format!("v={}\n", rng.gen_range(0..10_000)).as_bytes());
    }
    out.truncate(len);
    out
}

pub fn random_data(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf[..]);
    buf
}

pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

/// Cheap KDF settings so tests do not spend their time in Argon2.
pub fn fast_kdf() -> KdfParams {
    KdfParams { algorithm: KdfAlgorithm::Argon2id, memory_kib: 1024, iterations: 1, lanes: 1 }
}

pub fn options(level: i32, block_size: u32) -> CompressionOptions {
    CompressionOptions { level, block_size, threads: 4, ..Default::default() }
}

pub fn encrypted_options(level: i32, block_size: u32, password: &str) -> CompressionOptions {
    CompressionOptions {
        use_encryption: true,
        password: Some(password.to_string()),
        kdf: fast_kdf(),
        ..options(level, block_size)
    }
}

/// Names in `dir`, sorted. Used to check that failed operations leave nothing behind.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
