//! File content encryption.
//!
//! Ciphertext is the optional 8-byte masked header IV followed by fixed
//! size blocks. A block carries `mac ‖ rand ‖ data` encrypted as one unit:
//! full blocks with CBC, the short tail with the stream transform so its
//! length is preserved. Block IV seeds are `fileIv ^ blockIndex`. All-zero
//! blocks pass through unencrypted when holes are allowed, so sparse files
//! stay sparse.

use rand::RngCore;

use crate::config::VolumeConfig;
use crate::crypto::{ct_eq, CipherSuite};
use crate::error::EncfsError;

/// Size of the masked per-file header when unique IVs are enabled.
pub const HEADER_LEN: usize = 8;

/// Content geometry of a volume.
#[derive(Debug, Clone, Copy)]
pub struct BlockLayout {
    pub block_size: usize,
    pub mac_bytes: usize,
    pub rand_bytes: usize,
    pub unique_iv: bool,
    pub allow_holes: bool,
}

impl BlockLayout {
    pub fn from_config(config: &VolumeConfig) -> Self {
        Self {
            block_size: config.block_size,
            mac_bytes: config.block_mac_bytes,
            rand_bytes: config.block_mac_rand_bytes,
            unique_iv: config.unique_iv,
            allow_holes: config.allow_holes,
        }
    }

    /// MAC plus random-prefix bytes spent per stored block.
    pub fn overhead(&self) -> usize {
        self.mac_bytes + self.rand_bytes
    }

    /// Plaintext capacity of one stored block.
    pub fn payload(&self) -> usize {
        self.block_size - self.overhead()
    }

    pub fn header_len(&self) -> usize {
        if self.unique_iv {
            HEADER_LEN
        } else {
            0
        }
    }

    /// Plaintext length of a file given its ciphertext length.
    pub fn decrypted_size(&self, encrypted: u64) -> Result<u64, EncfsError> {
        if encrypted == 0 {
            // A backing file that was created but never written.
            return Ok(0);
        }
        let header = self.header_len() as u64;
        if encrypted < header {
            return Err(EncfsError::corrupt("file shorter than its header"));
        }
        let body = encrypted - header;
        let block_size = self.block_size as u64;
        let overhead = self.overhead() as u64;
        let full = body / block_size;
        let tail = body % block_size;
        if tail == 0 {
            Ok(full * self.payload() as u64)
        } else if tail <= overhead {
            Err(EncfsError::corrupt(
                "trailing block shorter than per-block overhead",
            ))
        } else {
            Ok(full * self.payload() as u64 + (tail - overhead))
        }
    }

    /// Ciphertext length of a file given its plaintext length. Inverse of
    /// `decrypted_size` for well-formed files.
    pub fn encrypted_size(&self, plain: u64) -> u64 {
        let header = self.header_len() as u64;
        if plain == 0 {
            return header;
        }
        let payload = self.payload() as u64;
        let full = plain / payload;
        let tail = plain % payload;
        let mut size = header + full * self.block_size as u64;
        if tail > 0 {
            size += self.overhead() as u64 + tail;
        }
        size
    }
}

pub struct ContentCodec<'a> {
    ciphers: &'a CipherSuite,
    layout: BlockLayout,
}

impl<'a> ContentCodec<'a> {
    pub fn new(ciphers: &'a CipherSuite, layout: BlockLayout) -> Self {
        Self { ciphers, layout }
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    /// Generate a fresh file IV and its masked on-disk header form.
    pub fn make_header(&self, external_iv: u64) -> ([u8; HEADER_LEN], u64) {
        let mut rng = rand::thread_rng();
        loop {
            let mut buf = [0u8; HEADER_LEN];
            rng.fill_bytes(&mut buf);
            let file_iv = u64::from_be_bytes(buf);
            // 0 marks "no unique IV" internally and is never a real file IV.
            if file_iv == 0 {
                continue;
            }
            let mut stored = buf;
            self.ciphers.stream_encode(&mut stored, external_iv);
            return (stored, file_iv);
        }
    }

    /// Recover the file IV from the stored header.
    pub fn unmask_header(
        &self,
        stored: &[u8],
        external_iv: u64,
    ) -> Result<u64, EncfsError> {
        if stored.len() != HEADER_LEN {
            return Err(EncfsError::corrupt("truncated file header"));
        }
        let mut buf = [0u8; HEADER_LEN];
        buf.copy_from_slice(stored);
        self.ciphers.stream_decode(&mut buf, external_iv);
        let file_iv = u64::from_be_bytes(buf);
        if file_iv == 0 {
            return Err(EncfsError::corrupt("file IV decodes to zero"));
        }
        Ok(file_iv)
    }

    /// Encrypt one plaintext block. `data` must not exceed the per-block
    /// payload; only the final block of a file may be shorter.
    pub fn encode_block(
        &self,
        index: u64,
        file_iv: u64,
        data: &[u8],
    ) -> Result<Vec<u8>, EncfsError> {
        if data.is_empty() || data.len() > self.layout.payload() {
            return Err(EncfsError::corrupt("plaintext block has invalid length"));
        }
        if self.layout.allow_holes && data.iter().all(|b| *b == 0) {
            return Ok(vec![0u8; self.layout.overhead() + data.len()]);
        }

        let mac_bytes = self.layout.mac_bytes;
        let mut buf = vec![0u8; mac_bytes + self.layout.rand_bytes];
        rand::thread_rng().fill_bytes(&mut buf[mac_bytes..]);
        buf.extend_from_slice(data);

        if mac_bytes > 0 {
            let mac = self.ciphers.mac_64(&buf[mac_bytes..], None).to_be_bytes();
            buf[..mac_bytes].copy_from_slice(&mac[8 - mac_bytes..]);
        }

        let seed = file_iv ^ index;
        if buf.len() == self.layout.block_size {
            self.ciphers.block_encode(&mut buf, seed)?;
        } else {
            self.ciphers.stream_encode(&mut buf, seed);
        }
        Ok(buf)
    }

    /// Decrypt one stored block and verify its MAC.
    pub fn decode_block(
        &self,
        index: u64,
        file_iv: u64,
        stored: &[u8],
    ) -> Result<Vec<u8>, EncfsError> {
        let overhead = self.layout.overhead();
        if stored.len() <= overhead || stored.len() > self.layout.block_size {
            return Err(EncfsError::corrupt("stored block has invalid length"));
        }
        if self.layout.allow_holes && stored.iter().all(|b| *b == 0) {
            return Ok(vec![0u8; stored.len() - overhead]);
        }

        let mut buf = stored.to_vec();
        let seed = file_iv ^ index;
        if buf.len() == self.layout.block_size {
            self.ciphers.block_decode(&mut buf, seed)?;
        } else {
            self.ciphers.stream_decode(&mut buf, seed);
        }

        let mac_bytes = self.layout.mac_bytes;
        if mac_bytes > 0 {
            let mac = self.ciphers.mac_64(&buf[mac_bytes..], None).to_be_bytes();
            if !ct_eq(&mac[8 - mac_bytes..], &buf[..mac_bytes]) {
                return Err(EncfsError::Checksum(format!(
                    "content MAC mismatch in block {}",
                    index
                )));
            }
        }
        buf.drain(..overhead);
        Ok(buf)
    }
}
