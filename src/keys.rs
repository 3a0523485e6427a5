//! Key derivation and volume-key wrapping.
//!
//! The passphrase never touches file data directly: PBKDF2-HMAC-SHA1 turns
//! it into a key-encryption context (KEK), which unwraps the random volume
//! key stored in the config file. The wrapped form carries a 32-bit folding
//! checksum that doubles as password verification.

use hmac::Hmac;
use rand::RngCore;
use sha1::Sha1;
use std::time::Instant;
use zeroize::Zeroizing;

use crate::config::VolumeConfig;
use crate::crypto::{ct_eq, CipherSuite, KeySize};
use crate::error::EncfsError;

/// Salt length used for new volumes.
pub const SALT_LEN: usize = 20;

/// Lower bound for PBKDF2 rounds regardless of how fast the host is.
const MIN_KDF_ITERATIONS: u32 = 1000;

/// Rounds used to probe KDF speed when benchmarking.
const PROBE_ITERATIONS: u32 = 10_000;

/// Derive the key-encryption context from the passphrase.
pub fn derive_kek(
    password: &str,
    salt: &[u8],
    iterations: u32,
    size: KeySize,
) -> Result<CipherSuite, EncfsError> {
    let mut material = Zeroizing::new(vec![0u8; size.material_len()]);
    let _ = pbkdf2::pbkdf2::<Hmac<Sha1>>(password.as_bytes(), salt, iterations, &mut material);
    CipherSuite::new(size, &material)
}

/// Unwrap the stored volume key using the volume passphrase.
///
/// A checksum mismatch means the passphrase is wrong; structural problems
/// with the stored blob surface as `CorruptData` before any key material
/// is interpreted.
pub fn unwrap_volume_key(config: &VolumeConfig, password: &str) -> Result<CipherSuite, EncfsError> {
    let kek = derive_kek(password, &config.salt, config.kdf_iterations, config.key_size)?;
    unwrap_with_kek(&kek, &config.encrypted_key, config.key_size)
}

pub(crate) fn unwrap_with_kek(
    kek: &CipherSuite,
    wrapped: &[u8],
    size: KeySize,
) -> Result<CipherSuite, EncfsError> {
    if wrapped.len() != 4 + size.material_len() {
        return Err(EncfsError::corrupt("wrapped volume key has wrong length"));
    }
    let mut checksum_bytes = [0u8; 4];
    checksum_bytes.copy_from_slice(&wrapped[..4]);
    let checksum = u32::from_be_bytes(checksum_bytes);

    let mut blob = Zeroizing::new(wrapped[4..].to_vec());
    kek.stream_decode(&mut blob, checksum as u64);

    let recomputed = kek.mac_32(&blob, None);
    if !ct_eq(&recomputed.to_be_bytes(), &checksum_bytes) {
        return Err(EncfsError::InvalidPassword);
    }
    CipherSuite::new(size, &blob)
}

/// Wrap raw volume key material under a KEK for persistence.
pub(crate) fn wrap_with_kek(kek: &CipherSuite, material: &[u8]) -> Vec<u8> {
    let checksum = kek.mac_32(material, None);
    let mut blob = material.to_vec();
    kek.stream_encode(&mut blob, checksum as u64);
    let mut out = Vec::with_capacity(4 + blob.len());
    out.extend_from_slice(&checksum.to_be_bytes());
    out.extend_from_slice(&blob);
    out
}

/// Fresh random volume key material (`key ‖ ivData`).
pub(crate) fn generate_volume_material(size: KeySize) -> Zeroizing<Vec<u8>> {
    let mut material = Zeroizing::new(vec![0u8; size.material_len()]);
    rand::thread_rng().fill_bytes(&mut material);
    material
}

pub(crate) fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Pick a PBKDF2 round count that takes roughly `target_ms` on this host,
/// by timing a short probe run and scaling. Never below
/// `MIN_KDF_ITERATIONS`.
pub fn benchmark_iterations(target_ms: u64) -> u32 {
    let salt = [0u8; SALT_LEN];
    let mut probe = [0u8; 20];
    let start = Instant::now();
    let _ =
        pbkdf2::pbkdf2::<Hmac<Sha1>>(b"kdf timing probe", &salt, PROBE_ITERATIONS, &mut probe);
    let elapsed_us = start.elapsed().as_micros().max(1);

    let scaled = (PROBE_ITERATIONS as u128 * target_ms as u128 * 1000) / elapsed_us;
    let rounds = scaled.min(u32::MAX as u128) as u32;
    let rounds = rounds.max(MIN_KDF_ITERATIONS);
    log::debug!(
        "KDF benchmark: {} probe rounds in {}us, choosing {} rounds for {}ms",
        PROBE_ITERATIONS,
        elapsed_us,
        rounds,
        target_ms
    );
    rounds
}
