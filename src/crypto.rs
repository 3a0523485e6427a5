//! Cipher suite shared by the filename and content codecs.
//!
//! EncFS derives every initialization vector from a 64-bit seed and keeps a
//! 16-byte IV-material block next to the AES key; the pair (`key ‖ ivData`)
//! forms one cipher context. The same construction is used for the
//! password-derived key-encryption key and for the unwrapped volume key.

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cipher::AsyncStreamCipher;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::EncfsError;

pub const AES_BLOCK: usize = 16;
pub const IV_DATA_LEN: usize = 16;

type HmacSha1 = Hmac<Sha1>;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes192CbcEnc = cbc::Encryptor<Aes192>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes192CbcDec = cbc::Decryptor<Aes192>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type Aes128CfbEnc = cfb_mode::Encryptor<Aes128>;
type Aes192CfbEnc = cfb_mode::Encryptor<Aes192>;
type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes128CfbDec = cfb_mode::Decryptor<Aes128>;
type Aes192CfbDec = cfb_mode::Decryptor<Aes192>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

// Key and IV slice lengths are enforced by `CipherSuite::new`, so the
// slice-based cipher constructors below cannot fail.
const FIXED_GEOMETRY: &str = "key and IV lengths are validated at construction";

/// AES key width of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySize {
    Aes128,
    Aes192,
    Aes256,
}

impl KeySize {
    pub fn from_bits(bits: u32) -> Result<Self, EncfsError> {
        match bits {
            128 => Ok(KeySize::Aes128),
            192 => Ok(KeySize::Aes192),
            256 => Ok(KeySize::Aes256),
            other => Err(EncfsError::config(format!("unsupported key size: {} bits", other))),
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            KeySize::Aes128 => 128,
            KeySize::Aes192 => 192,
            KeySize::Aes256 => 256,
        }
    }

    pub fn key_len(self) -> usize {
        (self.bits() / 8) as usize
    }

    /// Bytes of raw material a cipher context of this size consumes.
    pub fn material_len(self) -> usize {
        self.key_len() + IV_DATA_LEN
    }
}

/// One cipher context: AES key plus IV material, HMAC-SHA1 keyed with the
/// AES key. Material is zeroized on drop.
pub struct CipherSuite {
    size: KeySize,
    material: Zeroizing<Vec<u8>>,
}

impl CipherSuite {
    /// Build a context from `key ‖ ivData` raw material.
    pub fn new(size: KeySize, material: &[u8]) -> Result<Self, EncfsError> {
        if material.len() != size.material_len() {
            return Err(EncfsError::corrupt(format!(
                "cipher material is {} bytes, expected {}",
                material.len(),
                size.material_len(),
            )));
        }
        Ok(Self {
            size,
            material: Zeroizing::new(material.to_vec()),
        })
    }

    pub fn key_size(&self) -> KeySize {
        self.size
    }

    pub(crate) fn key(&self) -> &[u8] {
        &self.material[..self.size.key_len()]
    }

    fn iv_data(&self) -> &[u8] {
        &self.material[self.size.key_len()..]
    }

    #[allow(clippy::expect_used)]
    fn hmac(&self) -> HmacSha1 {
        HmacSha1::new_from_slice(self.key()).expect("HMAC-SHA1 accepts any key length")
    }

    /// Expand a 64-bit seed into a full AES IV:
    /// `HMAC-SHA1(key, le64(seed) ‖ ivData)` truncated to 16 bytes.
    fn derive_iv(&self, seed: u64) -> [u8; IV_DATA_LEN] {
        let mut mac = self.hmac();
        mac.update(&seed.to_le_bytes());
        mac.update(self.iv_data());
        let digest = mac.finalize().into_bytes();
        let mut iv = [0u8; IV_DATA_LEN];
        iv.copy_from_slice(&digest[..IV_DATA_LEN]);
        iv
    }

    /// 64-bit folding MAC. When `chain` is given, its value is mixed into
    /// the digest (serialized little-endian after the data) and then
    /// replaced by the result, which is how directory IV chaining
    /// propagates along path components.
    ///
    /// The fold XORs digest bytes 0..19 into an 8-byte lane; the final
    /// digest byte is left out, matching the reference implementation.
    pub fn mac_64(&self, data: &[u8], chain: Option<&mut u64>) -> u64 {
        let mut mac = self.hmac();
        mac.update(data);
        if let Some(iv) = chain.as_deref() {
            mac.update(&iv.to_le_bytes());
        }
        let digest = mac.finalize().into_bytes();
        let mut folded = [0u8; 8];
        for (i, b) in digest.iter().take(digest.len() - 1).enumerate() {
            folded[i % 8] ^= *b;
        }
        let value = u64::from_be_bytes(folded);
        if let Some(iv) = chain {
            *iv = value;
        }
        value
    }

    pub fn mac_32(&self, data: &[u8], chain: Option<&mut u64>) -> u32 {
        let mac = self.mac_64(data, chain);
        ((mac >> 32) as u32) ^ (mac as u32)
    }

    pub fn mac_16(&self, data: &[u8], chain: Option<&mut u64>) -> u16 {
        let mac = self.mac_32(data, chain);
        ((mac >> 16) as u16) ^ (mac as u16)
    }

    /// AES-CBC over whole blocks, in place. `buf` must be a multiple of the
    /// AES block size.
    #[allow(clippy::expect_used)]
    pub fn block_encode(&self, buf: &mut [u8], seed: u64) -> Result<(), EncfsError> {
        if buf.len() % AES_BLOCK != 0 {
            return Err(EncfsError::corrupt("block payload is not block-aligned"));
        }
        let iv = self.derive_iv(seed);
        let blocks = to_blocks_mut(buf);
        match self.size {
            KeySize::Aes128 => Aes128CbcEnc::new_from_slices(self.key(), &iv)
                .expect(FIXED_GEOMETRY)
                .encrypt_blocks_mut(blocks),
            KeySize::Aes192 => Aes192CbcEnc::new_from_slices(self.key(), &iv)
                .expect(FIXED_GEOMETRY)
                .encrypt_blocks_mut(blocks),
            KeySize::Aes256 => Aes256CbcEnc::new_from_slices(self.key(), &iv)
                .expect(FIXED_GEOMETRY)
                .encrypt_blocks_mut(blocks),
        }
        Ok(())
    }

    #[allow(clippy::expect_used)]
    pub fn block_decode(&self, buf: &mut [u8], seed: u64) -> Result<(), EncfsError> {
        if buf.len() % AES_BLOCK != 0 {
            return Err(EncfsError::corrupt("ciphertext block is not block-aligned"));
        }
        let iv = self.derive_iv(seed);
        let blocks = to_blocks_mut(buf);
        match self.size {
            KeySize::Aes128 => Aes128CbcDec::new_from_slices(self.key(), &iv)
                .expect(FIXED_GEOMETRY)
                .decrypt_blocks_mut(blocks),
            KeySize::Aes192 => Aes192CbcDec::new_from_slices(self.key(), &iv)
                .expect(FIXED_GEOMETRY)
                .decrypt_blocks_mut(blocks),
            KeySize::Aes256 => Aes256CbcDec::new_from_slices(self.key(), &iv)
                .expect(FIXED_GEOMETRY)
                .decrypt_blocks_mut(blocks),
        }
        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn cfb_encrypt(&self, buf: &mut [u8], iv: &[u8; IV_DATA_LEN]) {
        match self.size {
            KeySize::Aes128 => Aes128CfbEnc::new_from_slices(self.key(), iv)
                .expect(FIXED_GEOMETRY)
                .encrypt(buf),
            KeySize::Aes192 => Aes192CfbEnc::new_from_slices(self.key(), iv)
                .expect(FIXED_GEOMETRY)
                .encrypt(buf),
            KeySize::Aes256 => Aes256CfbEnc::new_from_slices(self.key(), iv)
                .expect(FIXED_GEOMETRY)
                .encrypt(buf),
        }
    }

    #[allow(clippy::expect_used)]
    fn cfb_decrypt(&self, buf: &mut [u8], iv: &[u8; IV_DATA_LEN]) {
        match self.size {
            KeySize::Aes128 => Aes128CfbDec::new_from_slices(self.key(), iv)
                .expect(FIXED_GEOMETRY)
                .decrypt(buf),
            KeySize::Aes192 => Aes192CfbDec::new_from_slices(self.key(), iv)
                .expect(FIXED_GEOMETRY)
                .decrypt(buf),
            KeySize::Aes256 => Aes256CfbDec::new_from_slices(self.key(), iv)
                .expect(FIXED_GEOMETRY)
                .decrypt(buf),
        }
    }

    /// EncFS stream transform: shuffle, CFB with `seed`, flip 64-byte
    /// chunks, shuffle again, CFB with `seed + 1`. Length-preserving and
    /// defined for any non-empty buffer.
    pub fn stream_encode(&self, buf: &mut [u8], seed: u64) {
        if buf.is_empty() {
            return;
        }
        shuffle(buf);
        let iv = self.derive_iv(seed);
        self.cfb_encrypt(buf, &iv);
        flip_chunks(buf);
        shuffle(buf);
        let iv = self.derive_iv(seed.wrapping_add(1));
        self.cfb_encrypt(buf, &iv);
    }

    pub fn stream_decode(&self, buf: &mut [u8], seed: u64) {
        if buf.is_empty() {
            return;
        }
        let iv = self.derive_iv(seed.wrapping_add(1));
        self.cfb_decrypt(buf, &iv);
        unshuffle(buf);
        flip_chunks(buf);
        let iv = self.derive_iv(seed);
        self.cfb_decrypt(buf, &iv);
        unshuffle(buf);
    }
}

/// Constant-time equality for MAC and checksum comparison.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

fn shuffle(buf: &mut [u8]) {
    for i in 1..buf.len() {
        buf[i] ^= buf[i - 1];
    }
}

fn unshuffle(buf: &mut [u8]) {
    for i in (1..buf.len()).rev() {
        buf[i] ^= buf[i - 1];
    }
}

/// Reverse each 64-byte chunk in place (the reference flips through a
/// 64-byte scratch buffer, so the reversal is chunked, not whole-buffer).
fn flip_chunks(buf: &mut [u8]) {
    for chunk in buf.chunks_mut(64) {
        chunk.reverse();
    }
}

/// Helper: reinterpret a mutable byte slice as mutable AES blocks.
#[allow(unsafe_code)]
fn to_blocks_mut(data: &mut [u8]) -> &mut [aes::Block] {
    assert!(data.len() % AES_BLOCK == 0);
    // SAFETY: aes::Block is [u8; 16] with the same alignment as u8
    unsafe {
        std::slice::from_raw_parts_mut(data.as_mut_ptr() as *mut aes::Block, data.len() / AES_BLOCK)
    }
}
