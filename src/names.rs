//! Filename encoding and decoding.
//!
//! Both modes prepend a 16-bit folding MAC of the plaintext name and seed
//! the name cipher with `mac ^ parentChainIv`. The MAC call doubles as the
//! chain-IV update: after encoding or decoding a component, the chain value
//! has been folded down one level and is ready for that component's
//! children. Block mode pads to the AES block and uses CBC; stream mode is
//! length-preserving via the stream transform.

use crate::b64;
use crate::config::FilenameAlgorithm;
use crate::crypto::{ct_eq, CipherSuite, AES_BLOCK};
use crate::error::EncfsError;

pub struct NameCodec<'a> {
    ciphers: &'a CipherSuite,
    alg: FilenameAlgorithm,
    chained: bool,
}

impl<'a> NameCodec<'a> {
    pub fn new(ciphers: &'a CipherSuite, alg: FilenameAlgorithm, chained: bool) -> Self {
        Self {
            ciphers,
            alg,
            chained,
        }
    }

    pub fn chained(&self) -> bool {
        self.chained
    }

    /// Encode one path component under the parent chain IV. With chaining
    /// enabled the chain value is advanced to this component's level.
    pub fn encode_name(
        &self,
        plain: &str,
        chain: Option<&mut u64>,
    ) -> Result<String, EncfsError> {
        if plain.is_empty() {
            return Err(EncfsError::corrupt("empty path component"));
        }
        match self.alg {
            FilenameAlgorithm::Block => self.encode_block(plain, chain),
            FilenameAlgorithm::Stream => self.encode_stream(plain, chain),
        }
    }

    /// Decode one encoded component under the parent chain IV.
    pub fn decode_name(
        &self,
        encoded: &str,
        chain: Option<&mut u64>,
    ) -> Result<String, EncfsError> {
        if encoded.is_empty() {
            return Err(EncfsError::corrupt("empty encoded component"));
        }
        match self.alg {
            FilenameAlgorithm::Block => self.decode_block(encoded, chain),
            FilenameAlgorithm::Stream => self.decode_stream(encoded, chain),
        }
    }

    /// Encode a logical absolute path into its on-disk relative form.
    /// Returns the encoded path and the chain IV folded over every
    /// component (the file IV used for external IV chaining). The root
    /// path encodes to the empty string.
    pub fn encode_path(&self, plain_path: &str) -> Result<(String, u64), EncfsError> {
        let mut chain = 0u64;
        let mut parts = Vec::new();
        for component in plain_path.split('/').filter(|c| !c.is_empty()) {
            let encoded = self.encode_name(component, self.chain_arg(&mut chain))?;
            parts.push(encoded);
        }
        Ok((parts.join("/"), chain))
    }

    /// Decode an on-disk relative path back to the logical absolute path.
    pub fn decode_path(&self, encoded_path: &str) -> Result<String, EncfsError> {
        let mut chain = 0u64;
        let mut out = String::new();
        for component in encoded_path.split('/').filter(|c| !c.is_empty()) {
            let plain = self.decode_name(component, self.chain_arg(&mut chain))?;
            out.push('/');
            out.push_str(&plain);
        }
        if out.is_empty() {
            out.push('/');
        }
        Ok(out)
    }

    /// Chain IV of a directory: the fold over its components, 0 at root
    /// (and 0 everywhere when chaining is off).
    pub fn chain_iv(&self, plain_path: &str) -> Result<u64, EncfsError> {
        Ok(self.encode_path(plain_path)?.1)
    }

    fn chain_arg<'b>(&self, chain: &'b mut u64) -> Option<&'b mut u64> {
        if self.chained {
            Some(chain)
        } else {
            None
        }
    }

    fn encode_block(
        &self,
        plain: &str,
        mut chain: Option<&mut u64>,
    ) -> Result<String, EncfsError> {
        let name = plain.as_bytes();
        let padding = AES_BLOCK - name.len() % AES_BLOCK;
        let parent_iv = chain.as_deref().copied().unwrap_or(0);

        let mut buf = Vec::with_capacity(2 + name.len() + padding);
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(name);
        buf.resize(2 + name.len() + padding, padding as u8);

        // The MAC covers the padded name and advances the chain.
        let mac = self.ciphers.mac_16(&buf[2..], chain.as_deref_mut());
        buf[0] = (mac >> 8) as u8;
        buf[1] = mac as u8;

        self.ciphers
            .block_encode(&mut buf[2..], (mac as u64) ^ parent_iv)?;
        Ok(b64::encode(&buf))
    }

    fn decode_block(
        &self,
        encoded: &str,
        mut chain: Option<&mut u64>,
    ) -> Result<String, EncfsError> {
        let raw = b64::decode(encoded)?;
        if raw.len() < 2 {
            return Err(EncfsError::corrupt("encoded name shorter than its checksum"));
        }
        let stored_mac = ((raw[0] as u16) << 8) | raw[1] as u16;
        let mut body = raw[2..].to_vec();
        if body.len() < AES_BLOCK || body.len() % AES_BLOCK != 0 {
            return Err(EncfsError::corrupt("encoded name is not block-aligned"));
        }
        let parent_iv = chain.as_deref().copied().unwrap_or(0);
        self.ciphers
            .block_decode(&mut body, (stored_mac as u64) ^ parent_iv)?;

        let padding = *body.last().unwrap_or(&0) as usize;
        if padding == 0 || padding > AES_BLOCK || padding > body.len() {
            return Err(EncfsError::corrupt("invalid filename padding"));
        }

        let mac = self.ciphers.mac_16(&body, chain.as_deref_mut());
        if !ct_eq(&mac.to_be_bytes(), &stored_mac.to_be_bytes()) {
            return Err(EncfsError::Checksum("filename MAC mismatch".to_string()));
        }

        body.truncate(body.len() - padding);
        String::from_utf8(body).map_err(|_| EncfsError::corrupt("decoded name is not UTF-8"))
    }

    fn encode_stream(
        &self,
        plain: &str,
        mut chain: Option<&mut u64>,
    ) -> Result<String, EncfsError> {
        let name = plain.as_bytes();
        let parent_iv = chain.as_deref().copied().unwrap_or(0);
        let mac = self.ciphers.mac_16(name, chain.as_deref_mut());

        let mut buf = Vec::with_capacity(2 + name.len());
        buf.push((mac >> 8) as u8);
        buf.push(mac as u8);
        buf.extend_from_slice(name);
        self.ciphers
            .stream_encode(&mut buf[2..], (mac as u64) ^ parent_iv);
        Ok(b64::encode(&buf))
    }

    fn decode_stream(
        &self,
        encoded: &str,
        mut chain: Option<&mut u64>,
    ) -> Result<String, EncfsError> {
        let raw = b64::decode(encoded)?;
        if raw.len() < 2 {
            return Err(EncfsError::corrupt("encoded name shorter than its checksum"));
        }
        let stored_mac = ((raw[0] as u16) << 8) | raw[1] as u16;
        let mut body = raw[2..].to_vec();
        if body.is_empty() {
            return Err(EncfsError::corrupt("encoded name has no payload"));
        }
        let parent_iv = chain.as_deref().copied().unwrap_or(0);
        self.ciphers
            .stream_decode(&mut body, (stored_mac as u64) ^ parent_iv);

        let mac = self.ciphers.mac_16(&body, chain.as_deref_mut());
        if !ct_eq(&mac.to_be_bytes(), &stored_mac.to_be_bytes()) {
            return Err(EncfsError::Checksum("filename MAC mismatch".to_string()));
        }
        String::from_utf8(body).map_err(|_| EncfsError::corrupt("decoded name is not UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeySize;

    fn suite() -> CipherSuite {
        let material: Vec<u8> = (0..KeySize::Aes192.material_len() as u8).collect();
        CipherSuite::new(KeySize::Aes192, &material).unwrap()
    }

    #[test]
    fn test_block_name_roundtrip() {
        let cs = suite();
        let codec = NameCodec::new(&cs, FilenameAlgorithm::Block, true);
        for name in ["a", "test.txt", "a-much-longer-file-name.tar.gz", "ünïcodé"] {
            let mut chain = 0u64;
            let encoded = codec.encode_name(name, Some(&mut chain)).unwrap();
            assert_ne!(encoded, name);
            let mut chain2 = 0u64;
            let decoded = codec.decode_name(&encoded, Some(&mut chain2)).unwrap();
            assert_eq!(decoded, name);
            // Encode and decode fold the chain identically.
            assert_eq!(chain, chain2);
            assert_ne!(chain, 0);
        }
    }

    #[test]
    fn test_stream_name_roundtrip() {
        let cs = suite();
        let codec = NameCodec::new(&cs, FilenameAlgorithm::Stream, true);
        for name in ["a", "test.txt", "a-much-longer-file-name.tar.gz"] {
            let mut chain = 0u64;
            let encoded = codec.encode_name(name, Some(&mut chain)).unwrap();
            let mut chain2 = 0u64;
            assert_eq!(codec.decode_name(&encoded, Some(&mut chain2)).unwrap(), name);
            assert_eq!(chain, chain2);
        }
    }

    #[test]
    fn test_stream_names_preserve_length_overhead() {
        let cs = suite();
        let codec = NameCodec::new(&cs, FilenameAlgorithm::Stream, false);
        let encoded = codec.encode_name("test.txt", None).unwrap();
        // 2 MAC bytes + 8 name bytes -> 10 raw bytes -> 14 characters.
        assert_eq!(encoded.len(), crate::b64::encoded_len(10));
    }

    #[test]
    fn test_chain_changes_encoding() {
        let cs = suite();
        let codec = NameCodec::new(&cs, FilenameAlgorithm::Block, true);
        let mut root_chain = 0u64;
        let under_root = codec.encode_name("child", Some(&mut root_chain)).unwrap();
        let mut dir_chain = 0u64;
        codec.encode_name("parent", Some(&mut dir_chain)).unwrap();
        let under_parent = codec.encode_name("child", Some(&mut dir_chain)).unwrap();
        assert_ne!(under_root, under_parent);
    }

    #[test]
    fn test_unchained_encoding_ignores_parent() {
        let cs = suite();
        let codec = NameCodec::new(&cs, FilenameAlgorithm::Block, false);
        let a = codec.encode_name("child", None).unwrap();
        let b = codec.encode_name("child", None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_path_roundtrip() {
        let cs = suite();
        let codec = NameCodec::new(&cs, FilenameAlgorithm::Block, true);
        let (encoded, iv) = codec.encode_path("/docs/work/report.txt").unwrap();
        assert_eq!(encoded.split('/').count(), 3);
        assert_ne!(iv, 0);
        assert_eq!(codec.decode_path(&encoded).unwrap(), "/docs/work/report.txt");
    }

    #[test]
    fn test_root_encodes_to_empty() {
        let cs = suite();
        let codec = NameCodec::new(&cs, FilenameAlgorithm::Block, true);
        let (encoded, iv) = codec.encode_path("/").unwrap();
        assert_eq!(encoded, "");
        assert_eq!(iv, 0);
        assert_eq!(codec.decode_path("").unwrap(), "/");
    }

    #[test]
    fn test_empty_component_rejected() {
        let cs = suite();
        let codec = NameCodec::new(&cs, FilenameAlgorithm::Block, true);
        assert!(codec.encode_name("", None).is_err());
    }

    #[test]
    fn test_tampered_name_fails_checksum() {
        let cs = suite();
        let codec = NameCodec::new(&cs, FilenameAlgorithm::Block, true);
        let mut chain = 0u64;
        let encoded = codec.encode_name("victim.txt", Some(&mut chain)).unwrap();
        // Swap one character for another alphabet member.
        let mut bytes: Vec<char> = encoded.chars().collect();
        bytes[3] = if bytes[3] == 'A' { 'B' } else { 'A' };
        let tampered: String = bytes.into_iter().collect();
        let mut chain2 = 0u64;
        let result = codec.decode_name(&tampered, Some(&mut chain2));
        assert!(matches!(
            result,
            Err(EncfsError::Checksum(_)) | Err(EncfsError::CorruptData(_))
        ));
    }

    #[test]
    fn test_wrong_parent_chain_fails_checksum() {
        let cs = suite();
        let codec = NameCodec::new(&cs, FilenameAlgorithm::Block, true);
        let mut chain = 0u64;
        codec.encode_name("parent", Some(&mut chain)).unwrap();
        let parent_chain = chain;
        let encoded = codec.encode_name("child", Some(&mut chain)).unwrap();
        // Correct parent chain decodes...
        let mut good = parent_chain;
        assert!(codec.decode_name(&encoded, Some(&mut good)).is_ok());
        // ...the root chain does not.
        let mut bad = 0u64;
        assert!(codec.decode_name(&encoded, Some(&mut bad)).is_err());
    }

    #[test]
    fn test_short_garbage_is_corrupt() {
        let cs = suite();
        let codec = NameCodec::new(&cs, FilenameAlgorithm::Block, true);
        assert!(matches!(
            codec.decode_name("-", None),
            Err(EncfsError::CorruptData(_))
        ));
        assert!(matches!(
            codec.decode_name("--", None),
            Err(EncfsError::CorruptData(_))
        ));
    }
}
