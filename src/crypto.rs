//! Cryptography module for handling encryption and decryption.
//!
//! One key per archive, derived from the password and a random salt. Every block
//! is sealed with AES-256-GCM under a nonce computed from the archive's random
//! base nonce and the block index, and authenticated together with a digest of
//! the container header and its own index.

use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce, Tag};
use argon2::{Algorithm, Argon2, Params, Version};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{ArchiverError, Result};

pub const KEY_SIZE: usize = 32; // 256 bits for AES-256
pub const NONCE_SIZE: usize = 12; // 96 bits for GCM
pub const SALT_SIZE: usize = 16; // 128 bits for salt
pub const TAG_SIZE: usize = 16;

const PBKDF2_ROUNDS: u32 = 100_000;
const ARGON2_MEMORY_KIB: u32 = 19 * 1024;
const ARGON2_ITERATIONS: u32 = 2;

const CHECKSUM_CONTEXT: &str = "ntk 2024 archive checksum key v1";

/// Nonce counter reserved for the sealed dictionary.
pub const DICTIONARY_COUNTER: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfAlgorithm {
    Argon2id,
    Pbkdf2,
}

impl KdfAlgorithm {
    pub fn id(self) -> u8 {
        match self {
            KdfAlgorithm::Argon2id => 1,
            KdfAlgorithm::Pbkdf2 => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(KdfAlgorithm::Argon2id),
            2 => Some(KdfAlgorithm::Pbkdf2),
            _ => None,
        }
    }
}

/// Key-derivation parameters, stored in every encrypted archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: KdfAlgorithm,
    /// Argon2 memory cost in KiB. Unused (0) for PBKDF2.
    pub memory_kib: u32,
    pub iterations: u32,
    /// Argon2 parallelism. Always 1 for PBKDF2.
    pub lanes: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::argon2id()
    }
}

impl KdfParams {
    pub fn argon2id() -> Self {
        Self {
            algorithm: KdfAlgorithm::Argon2id,
            memory_kib: ARGON2_MEMORY_KIB,
            iterations: ARGON2_ITERATIONS,
            lanes: 1,
        }
    }

    pub fn pbkdf2() -> Self {
        Self {
            algorithm: KdfAlgorithm::Pbkdf2,
            memory_kib: 0,
            iterations: PBKDF2_ROUNDS,
            lanes: 1,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        match self.algorithm {
            KdfAlgorithm::Argon2id => {
                if !(1024..=4 * 1024 * 1024).contains(&self.memory_kib) {
                    return Err(format!("argon2 memory {} KiB outside 1 MiB..=4 GiB", self.memory_kib));
                }
                if !(1..=64).contains(&self.iterations) {
                    return Err(format!("argon2 iterations {} outside 1..=64", self.iterations));
                }
                if !(1..=16).contains(&self.lanes) {
                    return Err(format!("argon2 lanes {} outside 1..=16", self.lanes));
                }
            }
            KdfAlgorithm::Pbkdf2 => {
                if !(10_000..=10_000_000).contains(&self.iterations) {
                    return Err(format!("pbkdf2 rounds {} outside 10000..=10000000", self.iterations));
                }
                if self.memory_kib != 0 || self.lanes != 1 {
                    return Err("pbkdf2 takes no memory or lane parameters".to_string());
                }
            }
        }
        Ok(())
    }
}

pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub fn generate_base_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn derive_key(password: &str, salt: &[u8], params: &KdfParams) -> Result<[u8; KEY_SIZE]> {
    params.validate().map_err(ArchiverError::Validation)?;
    let mut key = [0u8; KEY_SIZE];
    match params.algorithm {
        KdfAlgorithm::Argon2id => {
            let argon_params = Params::new(params.memory_kib, params.iterations, params.lanes, Some(KEY_SIZE))
                .map_err(|e| ArchiverError::Validation(format!("argon2 parameters: {}", e)))?;
            Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params)
                .hash_password_into(password.as_bytes(), salt, &mut key)
                .map_err(|e| ArchiverError::Validation(format!("argon2: {}", e)))?;
        }
        KdfAlgorithm::Pbkdf2 => {
            pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, params.iterations, &mut key);
        }
    }
    Ok(key)
}

/// Per-block nonce: the base nonce with its trailing 8 bytes XORed with `counter`.
pub fn block_nonce(base: &[u8; NONCE_SIZE], counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base;
    for (b, c) in nonce[NONCE_SIZE - 8..].iter_mut().zip(counter.to_le_bytes()) {
        *b ^= c;
    }
    nonce
}

/// Everything a worker needs to seal or open blocks of one archive.
pub struct ArchiveKey {
    cipher: Aes256Gcm,
    base_nonce: [u8; NONCE_SIZE],
    binding: [u8; 32],
    checksum_key: [u8; 32],
}

impl std::fmt::Debug for ArchiveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveKey").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlock {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

impl ArchiveKey {
    /// `header_digest` binds every block to the exact header it was written under.
    pub fn new(key: [u8; KEY_SIZE], base_nonce: [u8; NONCE_SIZE], header_digest: [u8; 32]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let checksum_key = blake3::derive_key(CHECKSUM_CONTEXT, &key);
        Self { cipher, base_nonce, binding: header_digest, checksum_key }
    }

    pub fn from_password(
        password: &str,
        salt: &[u8],
        params: &KdfParams,
        base_nonce: [u8; NONCE_SIZE],
        header_digest: [u8; 32],
    ) -> Result<Self> {
        let key = derive_key(password, salt, params)?;
        Ok(Self::new(key, base_nonce, header_digest))
    }

    pub fn nonce_for(&self, counter: u64) -> [u8; NONCE_SIZE] {
        block_nonce(&self.base_nonce, counter)
    }

    /// Key for the keyed BLAKE3 whole-file checksum of encrypted archives.
    pub fn checksum_key(&self) -> &[u8; 32] {
        &self.checksum_key
    }

    fn aad(&self, counter: u64) -> [u8; 40] {
        let mut aad = [0u8; 40];
        aad[..32].copy_from_slice(&self.binding);
        aad[32..].copy_from_slice(&counter.to_le_bytes());
        aad
    }
}

pub fn encrypt_block(key: &ArchiveKey, index: u64, plaintext: Vec<u8>) -> Result<SealedBlock> {
    let nonce = block_nonce(&key.base_nonce, index);
    let mut buffer = plaintext;
    let tag = key
        .cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), &key.aad(index), &mut buffer)
        .map_err(|_| ArchiverError::Integrity(format!("block {} could not be sealed", index)))?;
    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());
    Ok(SealedBlock { nonce, ciphertext: buffer, tag: tag_bytes })
}

/// Open a sealed block. A nonce that is not the one derived for `index`, or a
/// tag that does not verify, is reported as [`ArchiverError::Authentication`].
pub fn decrypt_block(
    key: &ArchiveKey,
    index: u64,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
    tag: &[u8; TAG_SIZE],
) -> Result<Vec<u8>> {
    if *nonce != block_nonce(&key.base_nonce, index) {
        return Err(ArchiverError::Authentication);
    }
    let mut buffer = ciphertext;
    key.cipher
        .decrypt_in_place_detached(Nonce::from_slice(nonce), &key.aad(index), &mut buffer, Tag::from_slice(tag))
        .map_err(|_| ArchiverError::Authentication)?;
    Ok(buffer)
}
