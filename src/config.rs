//! Volume configuration: the persisted `.encfs6.xml` record.
//!
//! The on-disk form is the boost-serialization XML written by EncFS 1.7.4.
//! Parsing is tolerant about attribute noise (`class_id`, `tracking_level`)
//! and whitespace inside the base64 blobs; emission mirrors the reference
//! layout so a reference implementation can open volumes created here.

use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt::Write as _;

use crate::crypto::KeySize;
use crate::error::EncfsError;

/// Name of the configuration file at the volume root.
pub const CONFIG_FILE_NAME: &str = ".encfs6.xml";

/// Config format revision written by EncFS 1.7.4.
const CONFIG_VERSION: u32 = 20100713;

const CIPHER_AES: &str = "ssl/aes";
const CIPHER_BLOWFISH: &str = "ssl/blowfish";
const NAMEIO_BLOCK: &str = "nameio/block";
const NAMEIO_STREAM: &str = "nameio/stream";
const NAMEIO_NULL: &str = "nameio/null";

/// Filename encoding algorithm of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilenameAlgorithm {
    Block,
    Stream,
}

impl FilenameAlgorithm {
    /// Parse an interface name as stored in the config file.
    pub fn parse(name: &str) -> Result<Self, EncfsError> {
        match name {
            NAMEIO_BLOCK => Ok(FilenameAlgorithm::Block),
            NAMEIO_STREAM => Ok(FilenameAlgorithm::Stream),
            NAMEIO_NULL => Err(EncfsError::Unsupported(
                "plaintext filename mode (nameio/null)".to_string(),
            )),
            other => Err(EncfsError::config(format!(
                "unknown filename algorithm: {}",
                other
            ))),
        }
    }

    pub fn interface_name(self) -> &'static str {
        match self {
            FilenameAlgorithm::Block => NAMEIO_BLOCK,
            FilenameAlgorithm::Stream => NAMEIO_STREAM,
        }
    }

    /// Interface revision pair (major/minor) as written by the reference.
    fn interface_version(self) -> (u32, u32) {
        match self {
            FilenameAlgorithm::Block => (3, 0),
            FilenameAlgorithm::Stream => (2, 1),
        }
    }
}

/// Parsed volume configuration. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct VolumeConfig {
    pub key_size: KeySize,
    pub block_size: usize,
    pub unique_iv: bool,
    pub chained_name_iv: bool,
    pub external_iv_chaining: bool,
    pub block_mac_bytes: usize,
    pub block_mac_rand_bytes: usize,
    pub allow_holes: bool,
    pub name_alg: FilenameAlgorithm,
    /// PBKDF2 salt.
    pub salt: Vec<u8>,
    pub kdf_iterations: u32,
    /// KDF benchmarking target recorded at creation, in milliseconds.
    pub desired_kdf_duration_ms: u64,
    /// Wrapped volume key: 4-byte checksum followed by the encrypted blob.
    pub encrypted_key: Vec<u8>,
}

/// Creation-time parameters; persisted fields are derived from these plus
/// fresh random material. Defaults match `encfs 1.7.4` standard mode.
#[derive(Debug, Clone)]
pub struct VolumeProfile {
    pub key_size: KeySize,
    pub block_size: usize,
    pub name_alg: FilenameAlgorithm,
    pub unique_iv: bool,
    pub chained_name_iv: bool,
    pub external_iv_chaining: bool,
    pub block_mac_bytes: usize,
    pub block_mac_rand_bytes: usize,
    pub allow_holes: bool,
    pub kdf_duration_ms: u64,
}

impl Default for VolumeProfile {
    fn default() -> Self {
        Self {
            key_size: KeySize::Aes192,
            block_size: 1024,
            name_alg: FilenameAlgorithm::Block,
            unique_iv: true,
            chained_name_iv: true,
            external_iv_chaining: false,
            block_mac_bytes: 0,
            block_mac_rand_bytes: 0,
            allow_holes: true,
            kdf_duration_ms: 500,
        }
    }
}

impl VolumeProfile {
    /// Paranoia preset: AES-256, per-block MACs with random prefix,
    /// external IV chaining.
    pub fn paranoid() -> Self {
        Self {
            key_size: KeySize::Aes256,
            block_mac_bytes: 8,
            block_mac_rand_bytes: 8,
            external_iv_chaining: true,
            ..Self::default()
        }
    }
}

impl VolumeConfig {
    /// Parse the contents of `.encfs6.xml`.
    pub fn parse_xml(text: &str) -> Result<Self, EncfsError> {
        let raw = RawConfig::parse(text)?;

        match raw.require_str("cipherAlg/name")?.as_str() {
            CIPHER_AES => {}
            CIPHER_BLOWFISH => {
                return Err(EncfsError::Unsupported("blowfish cipher".to_string()));
            }
            other => {
                return Err(EncfsError::config(format!("unknown cipher: {}", other)));
            }
        }
        if raw.require_int("cipherAlg/major")? < 3 {
            return Err(EncfsError::Unsupported(
                "pre-1.7 cipher interface revision".to_string(),
            ));
        }
        let version = raw.require_int("version")?;
        if version != CONFIG_VERSION as u64 {
            return Err(EncfsError::Unsupported(format!(
                "config format revision {} (expected {})",
                version, CONFIG_VERSION,
            )));
        }

        let name_alg = FilenameAlgorithm::parse(&raw.require_str("nameAlg/name")?)?;

        let salt = decode_base64(&raw.require_str("saltData")?)?;
        if salt.len() != raw.require_int("saltLen")? as usize {
            return Err(EncfsError::config("salt length mismatch".to_string()));
        }
        let encrypted_key = decode_base64(&raw.require_str("encodedKeyData")?)?;
        if encrypted_key.len() != raw.require_int("encodedKeySize")? as usize {
            return Err(EncfsError::config("encoded key length mismatch".to_string()));
        }

        let config = VolumeConfig {
            key_size: KeySize::from_bits(raw.require_int("keySize")? as u32)?,
            block_size: raw.require_int("blockSize")? as usize,
            unique_iv: raw.require_int("uniqueIV")? != 0,
            chained_name_iv: raw.require_int("chainedNameIV")? != 0,
            external_iv_chaining: raw.require_int("externalIVChaining")? != 0,
            block_mac_bytes: raw.require_int("blockMACBytes")? as usize,
            block_mac_rand_bytes: raw.require_int("blockMACRandBytes")? as usize,
            allow_holes: raw.require_int("allowHoles")? != 0,
            name_alg,
            salt,
            kdf_iterations: raw.require_int("kdfIterations")? as u32,
            desired_kdf_duration_ms: raw.require_int("desiredKDFDuration")?,
            encrypted_key,
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field invariants; every load and create path runs this.
    pub fn validate(&self) -> Result<(), EncfsError> {
        if !self.block_size.is_power_of_two() || !(64..=8192).contains(&self.block_size) {
            return Err(EncfsError::config(format!(
                "block size {} is not a power of two in 64..=8192",
                self.block_size
            )));
        }
        if !matches!(self.block_mac_bytes, 0 | 4 | 8) {
            return Err(EncfsError::config(format!(
                "blockMACBytes must be 0, 4 or 8 (got {})",
                self.block_mac_bytes
            )));
        }
        if !matches!(self.block_mac_rand_bytes, 0 | 8) {
            return Err(EncfsError::config(format!(
                "blockMACRandBytes must be 0 or 8 (got {})",
                self.block_mac_rand_bytes
            )));
        }
        if self.block_mac_rand_bytes > 0 && self.block_mac_bytes == 0 {
            return Err(EncfsError::config(
                "blockMACRandBytes requires blockMACBytes".to_string(),
            ));
        }
        if self.external_iv_chaining && !(self.unique_iv && self.chained_name_iv) {
            return Err(EncfsError::config(
                "externalIVChaining requires uniqueIV and chainedNameIV".to_string(),
            ));
        }
        if self.block_mac_bytes + self.block_mac_rand_bytes >= self.block_size {
            return Err(EncfsError::config(
                "per-block overhead leaves no room for data".to_string(),
            ));
        }
        if self.kdf_iterations == 0 {
            return Err(EncfsError::config(
                "kdfIterations must be positive".to_string(),
            ));
        }
        if self.encrypted_key.len() != 4 + self.key_size.material_len() {
            return Err(EncfsError::config(format!(
                "wrapped key is {} bytes, expected {}",
                self.encrypted_key.len(),
                4 + self.key_size.material_len()
            )));
        }
        Ok(())
    }

    /// Emit the boost-serialization XML form.
    pub fn to_xml(&self) -> String {
        let b64 = base64::engine::general_purpose::STANDARD;
        let (name_major, name_minor) = self.name_alg.interface_version();
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\" ?>\n");
        out.push_str("<!DOCTYPE boost_serialization>\n");
        out.push_str("<boost_serialization signature=\"serialization::archive\" version=\"9\">\n");
        out.push_str("<cfg class_id=\"0\" tracking_level=\"0\" version=\"20\">\n");
        let _ = writeln!(out, "\t<version>{}</version>", CONFIG_VERSION);
        let _ = writeln!(
            out,
            "\t<creator>encfsr {}</creator>",
            env!("CARGO_PKG_VERSION")
        );
        out.push_str("\t<cipherAlg class_id=\"1\" tracking_level=\"0\" version=\"0\">\n");
        let _ = writeln!(out, "\t\t<name>{}</name>", CIPHER_AES);
        out.push_str("\t\t<major>3</major>\n");
        out.push_str("\t\t<minor>0</minor>\n");
        out.push_str("\t</cipherAlg>\n");
        out.push_str("\t<nameAlg>\n");
        let _ = writeln!(out, "\t\t<name>{}</name>", self.name_alg.interface_name());
        let _ = writeln!(out, "\t\t<major>{}</major>", name_major);
        let _ = writeln!(out, "\t\t<minor>{}</minor>", name_minor);
        out.push_str("\t</nameAlg>\n");
        let _ = writeln!(out, "\t<keySize>{}</keySize>", self.key_size.bits());
        let _ = writeln!(out, "\t<blockSize>{}</blockSize>", self.block_size);
        let _ = writeln!(out, "\t<uniqueIV>{}</uniqueIV>", self.unique_iv as u8);
        let _ = writeln!(
            out,
            "\t<chainedNameIV>{}</chainedNameIV>",
            self.chained_name_iv as u8
        );
        let _ = writeln!(
            out,
            "\t<externalIVChaining>{}</externalIVChaining>",
            self.external_iv_chaining as u8
        );
        let _ = writeln!(
            out,
            "\t<blockMACBytes>{}</blockMACBytes>",
            self.block_mac_bytes
        );
        let _ = writeln!(
            out,
            "\t<blockMACRandBytes>{}</blockMACRandBytes>",
            self.block_mac_rand_bytes
        );
        let _ = writeln!(out, "\t<allowHoles>{}</allowHoles>", self.allow_holes as u8);
        let _ = writeln!(
            out,
            "\t<encodedKeySize>{}</encodedKeySize>",
            self.encrypted_key.len()
        );
        let _ = writeln!(
            out,
            "\t<encodedKeyData>\n{}\n</encodedKeyData>",
            b64.encode(&self.encrypted_key)
        );
        let _ = writeln!(out, "\t<saltLen>{}</saltLen>", self.salt.len());
        let _ = writeln!(out, "\t<saltData>\n{}\n</saltData>", b64.encode(&self.salt));
        let _ = writeln!(
            out,
            "\t<kdfIterations>{}</kdfIterations>",
            self.kdf_iterations
        );
        let _ = writeln!(
            out,
            "\t<desiredKDFDuration>{}</desiredKDFDuration>",
            self.desired_kdf_duration_ms
        );
        out.push_str("</cfg>\n");
        out.push_str("</boost_serialization>\n");
        out
    }
}

/// Flat element-path → text map pulled out of the XML event stream.
struct RawConfig {
    values: std::collections::HashMap<String, String>,
}

impl RawConfig {
    fn parse(text: &str) -> Result<Self, EncfsError> {
        let mut reader = Reader::from_reader(text.as_bytes());
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut values = std::collections::HashMap::new();
        let mut stack: Vec<String> = Vec::new();
        let mut seen_root = false;
        loop {
            buf.clear();
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    if name == "cfg" {
                        seen_root = true;
                    }
                    stack.push(name);
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(t)) => {
                    let value = t
                        .unescape()
                        .map_err(|e| EncfsError::config(format!("bad XML text: {}", e)))?;
                    // Key is the element path below <cfg>, e.g. "nameAlg/name".
                    // Append: a text node may be delivered in pieces.
                    if let Some(pos) = stack.iter().position(|n| n == "cfg") {
                        let key = stack[pos + 1..].join("/");
                        if !key.is_empty() {
                            let text = value.into_owned();
                            values
                                .entry(key)
                                .and_modify(|existing: &mut String| existing.push_str(&text))
                                .or_insert(text);
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(EncfsError::config(format!("malformed XML: {}", e)));
                }
            }
        }
        if !seen_root {
            return Err(EncfsError::config("missing <cfg> element".to_string()));
        }
        Ok(Self { values })
    }

    fn require_str(&self, key: &str) -> Result<String, EncfsError> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| EncfsError::config(format!("missing config field: {}", key)))
    }

    fn require_int(&self, key: &str) -> Result<u64, EncfsError> {
        let text = self.require_str(key)?;
        text.parse::<u64>()
            .map_err(|_| EncfsError::config(format!("field {} is not a number: {}", key, text)))
    }
}

fn decode_base64(data: &str) -> Result<Vec<u8>, EncfsError> {
    let compact: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| EncfsError::config(format!("invalid base64 in config: {}", e)))
}
