//! Volume lifecycle and tree operations.
//!
//! A `Volume` owns the unwrapped cipher context and a file provider; every
//! logical path is translated through the filename codec before it reaches
//! the provider. `EncFile` handles and the streams returned here borrow the
//! volume, so nothing can outlive the key material, which is zeroized when
//! the volume is dropped.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Mutex;

use crate::config::{VolumeConfig, VolumeProfile, CONFIG_FILE_NAME};
use crate::content::{BlockLayout, ContentCodec};
use crate::crypto::CipherSuite;
use crate::error::EncfsError;
use crate::keys;
use crate::names::NameCodec;
use crate::progress::{ProgressEvent, ProgressListener};
use crate::provider::{self, FileProvider, ROOT_PATH};
use crate::stream::{EncfsReader, EncfsWriter};

/// An opened EncFS volume.
pub struct Volume<P: FileProvider> {
    provider: P,
    config: VolumeConfig,
    ciphers: CipherSuite,
    layout: BlockLayout,
    /// plain absolute path → (provider path, chain IV folded over the
    /// whole path). Invalidated whenever a path stops being valid.
    path_cache: Mutex<HashMap<String, (String, u64)>>,
}

/// A logical file or directory inside a volume. Lightweight; holds a
/// borrow of its volume.
pub struct EncFile<'v, P: FileProvider> {
    volume: &'v Volume<P>,
    path: String,
    encoded_path: String,
    name: String,
    directory: bool,
    size: u64,
    modified: i64,
}

impl<P: FileProvider> Clone for EncFile<'_, P> {
    fn clone(&self) -> Self {
        Self {
            volume: self.volume,
            path: self.path.clone(),
            encoded_path: self.encoded_path.clone(),
            name: self.name.clone(),
            directory: self.directory,
            size: self.size,
            modified: self.modified,
        }
    }
}

impl<'v, P: FileProvider> EncFile<'v, P> {
    /// Logical absolute path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Provider-side (encrypted) absolute path.
    pub fn encoded_path(&self) -> &str {
        &self.encoded_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_directory(&self) -> bool {
        self.directory
    }

    /// Plaintext length in bytes; 0 for directories.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Unix seconds, 0 when the provider has no timestamp.
    pub fn modified(&self) -> i64 {
        self.modified
    }

    pub fn open_read(&self) -> Result<EncfsReader<'v, Box<dyn Read>>, EncfsError> {
        self.volume.open_read(&self.path)
    }
}

impl<P: FileProvider> Volume<P> {
    /// Open an existing volume with the given passphrase.
    pub fn open(provider: P, password: &str) -> Result<Self, EncfsError> {
        let config_path = provider::join(ROOT_PATH, CONFIG_FILE_NAME);
        if !provider.exists(&config_path)? {
            return Err(EncfsError::config(format!(
                "no {} at the volume root",
                CONFIG_FILE_NAME
            )));
        }
        let mut text = String::new();
        provider.open_input(&config_path)?.read_to_string(&mut text)?;
        let config = VolumeConfig::parse_xml(&text)?;
        let ciphers = keys::unwrap_volume_key(&config, password)?;
        log::debug!(
            "opened volume: {} bit AES, block {}, {} names{}",
            config.key_size.bits(),
            config.block_size,
            config.name_alg.interface_name(),
            if config.external_iv_chaining {
                ", external IV chaining"
            } else {
                ""
            }
        );
        Ok(Self {
            layout: BlockLayout::from_config(&config),
            provider,
            config,
            ciphers,
            path_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Create a fresh volume in the provider's root and open it.
    pub fn create(provider: P, password: &str, profile: VolumeProfile) -> Result<Self, EncfsError> {
        let config_path = provider::join(ROOT_PATH, CONFIG_FILE_NAME);
        if provider.exists(&config_path)? {
            return Err(EncfsError::config("volume already exists".to_string()));
        }

        let salt = keys::generate_salt();
        let iterations = keys::benchmark_iterations(profile.kdf_duration_ms);
        let kek = keys::derive_kek(password, &salt, iterations, profile.key_size)?;
        let material = keys::generate_volume_material(profile.key_size);
        let encrypted_key = keys::wrap_with_kek(&kek, &material);

        let config = VolumeConfig {
            key_size: profile.key_size,
            block_size: profile.block_size,
            unique_iv: profile.unique_iv,
            chained_name_iv: profile.chained_name_iv,
            external_iv_chaining: profile.external_iv_chaining,
            block_mac_bytes: profile.block_mac_bytes,
            block_mac_rand_bytes: profile.block_mac_rand_bytes,
            allow_holes: profile.allow_holes,
            name_alg: profile.name_alg,
            salt: salt.to_vec(),
            kdf_iterations: iterations,
            desired_kdf_duration_ms: profile.kdf_duration_ms,
            encrypted_key,
        };
        config.validate()?;

        let xml = config.to_xml();
        let mut out = provider.open_output(&config_path, Some(xml.len() as u64))?;
        out.write_all(xml.as_bytes())?;
        out.flush()?;
        drop(out);

        let ciphers = CipherSuite::new(profile.key_size, &material)?;
        log::debug!(
            "created volume: {} bit AES, {} KDF rounds",
            config.key_size.bits(),
            iterations
        );
        Ok(Self {
            layout: BlockLayout::from_config(&config),
            provider,
            config,
            ciphers,
            path_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Content geometry, for plaintext/ciphertext length conversions.
    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    fn names(&self) -> NameCodec<'_> {
        NameCodec::new(
            &self.ciphers,
            self.config.name_alg,
            self.config.chained_name_iv,
        )
    }

    fn content(&self) -> ContentCodec<'_> {
        ContentCodec::new(&self.ciphers, self.layout)
    }

    /// IV seeding a file's content header: its name IV under external IV
    /// chaining, 0 otherwise.
    fn content_iv(&self, name_iv: u64) -> u64 {
        if self.config.external_iv_chaining {
            name_iv
        } else {
            0
        }
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, u64)>> {
        self.path_cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Translate a logical path to its provider path and full-path chain
    /// IV, consulting the per-volume cache.
    fn lookup(&self, path: &str) -> Result<(String, u64), EncfsError> {
        provider::validate_path(path)?;
        if path == ROOT_PATH {
            return Ok((ROOT_PATH.to_string(), 0));
        }
        if let Some(hit) = self.cache().get(path) {
            return Ok(hit.clone());
        }
        let (encoded, iv) = self.names().encode_path(path)?;
        let raw = format!("/{}", encoded);
        self.cache().insert(path.to_string(), (raw.clone(), iv));
        Ok((raw, iv))
    }

    /// Drop cached translations for a path and everything below it.
    fn invalidate(&self, path: &str) {
        let prefix = format!("{}/", path);
        self.cache()
            .retain(|cached, _| cached != path && !cached.starts_with(&prefix));
    }

    pub fn exists(&self, path: &str) -> Result<bool, EncfsError> {
        let (raw, _) = self.lookup(path)?;
        self.provider.exists(&raw)
    }

    pub fn is_directory(&self, path: &str) -> Result<bool, EncfsError> {
        let (raw, _) = self.lookup(path)?;
        self.provider.is_directory(&raw)
    }

    /// Stat one logical path.
    pub fn file(&self, path: &str) -> Result<EncFile<'_, P>, EncfsError> {
        let (raw, _) = self.lookup(path)?;
        let info = self.provider.file_info(&raw)?;
        let size = if info.directory {
            0
        } else {
            self.layout.decrypted_size(info.size)?
        };
        Ok(EncFile {
            volume: self,
            path: path.to_string(),
            encoded_path: raw,
            name: provider::file_name(path).unwrap_or("").to_string(),
            directory: info.directory,
            size,
            modified: info.modified,
        })
    }

    /// List a logical directory. Entries whose stored names or sizes do not
    /// decode (foreign files, the config file at root) are skipped.
    pub fn list_dir(&self, path: &str) -> Result<Vec<EncFile<'_, P>>, EncfsError> {
        let (raw_dir, dir_iv) = self.lookup(path)?;
        let names = self.names();
        let mut out = Vec::new();
        for info in self.provider.list_files(&raw_dir)? {
            if path == ROOT_PATH && info.name == CONFIG_FILE_NAME {
                continue;
            }
            let mut chain = dir_iv;
            let plain_name =
                match names.decode_name(&info.name, chain_opt(names.chained(), &mut chain)) {
                    Ok(name) => name,
                    Err(err) => {
                        log::warn!("skipping undecodable entry {}: {}", info.name, err);
                        continue;
                    }
                };
            let size = if info.directory {
                0
            } else {
                match self.layout.decrypted_size(info.size) {
                    Ok(size) => size,
                    Err(err) => {
                        log::warn!("skipping entry with invalid size {}: {}", info.name, err);
                        continue;
                    }
                }
            };
            out.push(EncFile {
                volume: self,
                path: provider::join(path, &plain_name),
                encoded_path: info.path,
                name: plain_name,
                directory: info.directory,
                size,
                modified: info.modified,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Open a decrypting reader for a logical file.
    pub fn open_read(&self, path: &str) -> Result<EncfsReader<'_, Box<dyn Read>>, EncfsError> {
        let (raw, name_iv) = self.lookup(path)?;
        let inner = self.provider.open_input(&raw)?;
        EncfsReader::new(self.content(), inner, self.content_iv(name_iv))
    }

    /// Open an encrypting writer for a logical file, replacing any previous
    /// content. Pass the plaintext length when known so the provider can
    /// preallocate.
    pub fn open_write(
        &self,
        path: &str,
        plain_len: Option<u64>,
    ) -> Result<EncfsWriter<'_, Box<dyn Write>>, EncfsError> {
        let (raw, name_iv) = self.lookup(path)?;
        let raw_len = plain_len.map(|len| self.layout.encrypted_size(len));
        let inner = self.provider.open_output(&raw, raw_len)?;
        EncfsWriter::new(self.content(), inner, self.content_iv(name_iv))
    }

    /// Read a whole logical file into memory.
    pub fn read(&self, path: &str) -> Result<Vec<u8>, EncfsError> {
        let mut reader = self.open_read(path)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Write a whole logical file.
    pub fn write(&self, path: &str, data: &[u8]) -> Result<(), EncfsError> {
        let mut writer = self.open_write(path, Some(data.len() as u64))?;
        writer.write_all(data)?;
        writer.finish()
    }

    pub fn mkdir(&self, path: &str) -> Result<(), EncfsError> {
        let (raw, _) = self.lookup(path)?;
        self.provider.mkdir(&raw)
    }

    /// Create a directory and any missing ancestors.
    pub fn mkdir_all(&self, path: &str) -> Result<(), EncfsError> {
        provider::validate_path(path)?;
        let mut current = String::new();
        for component in provider::components(path) {
            current.push('/');
            current.push_str(component);
            if !self.exists(&current)? {
                self.mkdir(&current)?;
            }
        }
        Ok(())
    }

    /// Recursively delete a file or directory tree, children first.
    pub fn delete(
        &self,
        path: &str,
        mut listener: Option<&mut dyn ProgressListener>,
    ) -> Result<(), EncfsError> {
        let nodes = self.collect_subtree(path)?;
        notify(&mut listener, ProgressEvent::FilesCounted(nodes.len()));
        // Children come after parents in the collection; delete in reverse.
        for (rel, _) in nodes.iter().rev() {
            let node_path = join_rel(path, rel);
            notify(&mut listener, ProgressEvent::NewFile(node_path.clone()));
            let (raw, _) = self.lookup(&node_path)?;
            self.provider.delete(&raw)?;
            self.invalidate(&node_path);
            notify(&mut listener, ProgressEvent::FileProcessed(node_path));
        }
        notify(&mut listener, ProgressEvent::OpComplete);
        Ok(())
    }

    /// Move a file or directory tree. With chained name IVs every
    /// descendant is re-encoded for the destination chain; with external IV
    /// chaining content is re-encrypted as well. No rollback is attempted
    /// on failure: partial progress stays on disk and the operation can be
    /// retried.
    pub fn rename(
        &self,
        src: &str,
        dst: &str,
        mut listener: Option<&mut dyn ProgressListener>,
    ) -> Result<(), EncfsError> {
        provider::validate_path(src)?;
        provider::validate_path(dst)?;
        if src == ROOT_PATH || dst == ROOT_PATH {
            return Err(EncfsError::corrupt("cannot move the volume root"));
        }
        if dst == src || dst.starts_with(&format!("{}/", src)) {
            return Err(EncfsError::corrupt("destination is inside the source"));
        }
        if self.exists(dst)? {
            return Err(EncfsError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("destination exists: {}", dst),
            )));
        }

        if self.config.external_iv_chaining {
            // Content headers are sealed with the name IV, so a move is a
            // re-encrypting copy followed by a delete.
            self.copy_tree(src, dst, &mut listener)?;
            self.delete(src, None)?;
            notify(&mut listener, ProgressEvent::OpComplete);
            return Ok(());
        }

        let nodes = self.collect_subtree(src)?;
        notify(&mut listener, ProgressEvent::FilesCounted(nodes.len()));

        let (raw_src, _) = self.lookup(src)?;
        let (raw_dst, _) = self.lookup(dst)?;
        self.provider.rename(&raw_src, &raw_dst)?;
        self.invalidate(src);
        log::debug!("moved {} -> {}", src, dst);

        if self.config.chained_name_iv {
            // The physical move carried stale descendant names with it;
            // re-encode them for the new chain, parents first.
            let names = self.names();
            for (rel, _) in nodes.iter().filter(|(rel, _)| !rel.is_empty()) {
                let old_path = join_rel(src, rel);
                let new_path = join_rel(dst, rel);
                notify(&mut listener, ProgressEvent::NewFile(new_path.clone()));

                let component = provider::file_name(&new_path)
                    .ok_or_else(|| EncfsError::corrupt("subtree node without a name"))?;
                let old_parent = provider::parent(&old_path)
                    .ok_or_else(|| EncfsError::corrupt("subtree node without a parent"))?;
                let new_parent = provider::parent(&new_path)
                    .ok_or_else(|| EncfsError::corrupt("subtree node without a parent"))?;

                let mut old_chain = names.chain_iv(old_parent)?;
                let old_name =
                    names.encode_name(component, chain_opt(names.chained(), &mut old_chain))?;
                // Ancestors are already re-encoded, so the parent resolves
                // through the normal lookup.
                let (new_parent_raw, mut new_chain) = self.lookup(new_parent)?;
                let new_name =
                    names.encode_name(component, chain_opt(names.chained(), &mut new_chain))?;

                if old_name != new_name {
                    self.provider.rename(
                        &provider::join(&new_parent_raw, &old_name),
                        &provider::join(&new_parent_raw, &new_name),
                    )?;
                }
                notify(&mut listener, ProgressEvent::FileProcessed(new_path));
            }
        }
        notify(&mut listener, ProgressEvent::OpComplete);
        Ok(())
    }

    /// Copy a file or directory tree. When the target is an existing
    /// directory the source keeps its name inside it. Content is
    /// re-encrypted under fresh header IVs when the volume uses unique IVs,
    /// otherwise raw blocks are copied.
    pub fn copy(
        &self,
        src: &str,
        dst: &str,
        mut listener: Option<&mut dyn ProgressListener>,
    ) -> Result<(), EncfsError> {
        provider::validate_path(src)?;
        provider::validate_path(dst)?;
        let dst = if self.exists(dst)? && self.is_directory(dst)? {
            let name = provider::file_name(src)
                .ok_or_else(|| EncfsError::corrupt("cannot copy the volume root"))?;
            provider::join(dst, name)
        } else {
            dst.to_string()
        };
        if dst == src || dst.starts_with(&format!("{}/", src)) {
            return Err(EncfsError::corrupt("destination is inside the source"));
        }
        self.copy_tree(src, &dst, &mut listener)?;
        notify(&mut listener, ProgressEvent::OpComplete);
        Ok(())
    }

    fn copy_tree(
        &self,
        src: &str,
        dst: &str,
        listener: &mut Option<&mut dyn ProgressListener>,
    ) -> Result<(), EncfsError> {
        let nodes = self.collect_subtree(src)?;
        notify(listener, ProgressEvent::FilesCounted(nodes.len()));
        for (rel, is_dir) in &nodes {
            let from = join_rel(src, rel);
            let to = join_rel(dst, rel);
            notify(listener, ProgressEvent::NewFile(to.clone()));
            if *is_dir {
                self.mkdir(&to)?;
            } else {
                self.copy_file(&from, &to)?;
            }
            notify(listener, ProgressEvent::FileProcessed(to));
        }
        Ok(())
    }

    fn copy_file(&self, src: &str, dst: &str) -> Result<(), EncfsError> {
        if self.config.unique_iv {
            // Re-encrypt under a fresh header IV (and the destination name
            // IV when external chaining is on).
            let info = self.file(src)?;
            let mut reader = self.open_read(src)?;
            let mut writer = self.open_write(dst, Some(info.size()))?;
            std::io::copy(&mut reader, &mut writer)?;
            writer.finish()
        } else {
            let (raw_src, _) = self.lookup(src)?;
            let (raw_dst, _) = self.lookup(dst)?;
            self.provider.copy(&raw_src, &raw_dst)
        }
    }

    /// Collect `(relative path, is_directory)` for a subtree, parents
    /// before children. The root itself is the empty relative path.
    fn collect_subtree(&self, path: &str) -> Result<Vec<(String, bool)>, EncfsError> {
        let mut out = vec![(String::new(), self.is_directory(path)?)];
        let mut index = 0;
        while index < out.len() {
            let (rel, is_dir) = out[index].clone();
            index += 1;
            if !is_dir {
                continue;
            }
            for child in self.list_dir(&join_rel(path, &rel))? {
                let child_rel = if rel.is_empty() {
                    child.name.clone()
                } else {
                    format!("{}/{}", rel, child.name)
                };
                out.push((child_rel, child.is_directory()));
            }
        }
        Ok(out)
    }
}

fn chain_opt(chained: bool, chain: &mut u64) -> Option<&mut u64> {
    if chained {
        Some(chain)
    } else {
        None
    }
}

fn join_rel(base: &str, rel: &str) -> String {
    if rel.is_empty() {
        base.to_string()
    } else {
        let mut path = base.to_string();
        for component in rel.split('/') {
            path = provider::join(&path, component);
        }
        path
    }
}

fn notify(listener: &mut Option<&mut dyn ProgressListener>, event: ProgressEvent) {
    if let Some(l) = listener.as_deref_mut() {
        l.on_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilenameAlgorithm;
    use crate::progress::CollectingListener;
    use crate::provider::MemoryFileProvider;

    fn quick_profile() -> VolumeProfile {
        // Keep the KDF cheap in tests.
        VolumeProfile {
            kdf_duration_ms: 0,
            ..VolumeProfile::default()
        }
    }

    fn new_volume() -> Volume<MemoryFileProvider> {
        Volume::create(MemoryFileProvider::new(), "testPassword", quick_profile()).unwrap()
    }

    #[test]
    fn test_create_and_reopen() {
        let provider = MemoryFileProvider::new();
        {
            let volume =
                Volume::create(provider.clone(), "testPassword", quick_profile()).unwrap();
            volume.write("/hello.txt", b"hi there").unwrap();
        }
        let volume = Volume::open(provider, "testPassword").unwrap();
        assert_eq!(volume.read("/hello.txt").unwrap(), b"hi there");
    }

    #[test]
    fn test_wrong_password_is_invalid() {
        let provider = MemoryFileProvider::new();
        Volume::create(provider.clone(), "testPassword", quick_profile()).unwrap();
        assert!(matches!(
            Volume::open(provider, "badPassword"),
            Err(EncfsError::InvalidPassword)
        ));
    }

    #[test]
    fn test_open_without_config_is_invalid() {
        assert!(matches!(
            Volume::open(MemoryFileProvider::new(), "pw"),
            Err(EncfsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_listing_decodes_names_and_sizes() {
        let volume = new_volume();
        volume.write("/test.txt", b"This is a test file.\n").unwrap();
        volume.write("/longfile.txt", &[b'a'; 6000]).unwrap();
        volume.mkdir("/dir").unwrap();

        let listing = volume.list_dir("/").unwrap();
        let names: Vec<&str> = listing.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["dir", "longfile.txt", "test.txt"]);
        let long = listing.iter().find(|f| f.name() == "longfile.txt").unwrap();
        assert_eq!(long.size(), 6000);
        assert!(listing.iter().find(|f| f.name() == "dir").unwrap().is_directory());

        // Stored names are encrypted.
        for entry in &listing {
            assert_ne!(entry.name(), provider::file_name(entry.encoded_path()).unwrap());
        }
    }

    #[test]
    fn test_roundtrip_through_file_handle() {
        let volume = new_volume();
        let payload = vec![0x5au8; 10_000];
        volume.write("/dir-less.bin", &payload).unwrap();
        let handle = volume.file("/dir-less.bin").unwrap();
        assert_eq!(handle.size(), 10_000);
        let mut reader = handle.open_read().unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_zero_file_reads_back() {
        let volume = new_volume();
        let zeros = vec![0u8; 10_000];
        volume.write("/zerofile.bin", &zeros).unwrap();
        assert_eq!(volume.read("/zerofile.bin").unwrap(), zeros);
    }

    #[test]
    fn test_nested_dirs_and_chained_names() {
        let volume = new_volume();
        volume.mkdir("/a").unwrap();
        volume.mkdir("/a/b").unwrap();
        volume.write("/a/b/deep.txt", b"deep").unwrap();
        assert_eq!(volume.read("/a/b/deep.txt").unwrap(), b"deep");
        let inner = volume.list_dir("/a/b").unwrap();
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].path(), "/a/b/deep.txt");
    }

    #[test]
    fn test_rename_file() {
        let volume = new_volume();
        volume.write("/test.txt", b"hello\nworld").unwrap();
        volume.mkdir("/dir1").unwrap();
        volume.rename("/test.txt", "/dir1/test.txt", None).unwrap();
        assert!(!volume.exists("/test.txt").unwrap());
        assert_eq!(volume.read("/dir1/test.txt").unwrap(), b"hello\nworld");
    }

    #[test]
    fn test_rename_directory_reencodes_descendants() {
        let volume = new_volume();
        volume.mkdir("/old").unwrap();
        volume.mkdir("/old/sub").unwrap();
        volume.write("/old/sub/file.txt", b"payload").unwrap();

        let before: Vec<String> = volume
            .list_dir("/old/sub")
            .unwrap()
            .iter()
            .map(|f| f.encoded_path().to_string())
            .collect();

        volume.rename("/old", "/new", None).unwrap();
        assert!(!volume.exists("/old").unwrap());
        assert_eq!(volume.read("/new/sub/file.txt").unwrap(), b"payload");

        // Chained name IVs: the descendant's stored name moved with the
        // rename chain.
        let after: Vec<String> = volume
            .list_dir("/new/sub")
            .unwrap()
            .iter()
            .map(|f| f.encoded_path().to_string())
            .collect();
        let before_names: Vec<&str> = before
            .iter()
            .map(|p| provider::file_name(p).unwrap())
            .collect();
        let after_names: Vec<&str> = after
            .iter()
            .map(|p| provider::file_name(p).unwrap())
            .collect();
        assert_ne!(before_names, after_names);
    }

    #[test]
    fn test_rename_without_chaining_keeps_stored_names() {
        let profile = VolumeProfile {
            chained_name_iv: false,
            ..quick_profile()
        };
        let volume =
            Volume::create(MemoryFileProvider::new(), "pw", profile).unwrap();
        volume.mkdir("/old").unwrap();
        volume.write("/old/file.txt", b"data").unwrap();
        let before = volume.list_dir("/old").unwrap()[0]
            .encoded_path()
            .rsplit('/')
            .next()
            .unwrap()
            .to_string();
        volume.rename("/old", "/new", None).unwrap();
        let after = volume.list_dir("/new").unwrap()[0]
            .encoded_path()
            .rsplit('/')
            .next()
            .unwrap()
            .to_string();
        assert_eq!(before, after);
        assert_eq!(volume.read("/new/file.txt").unwrap(), b"data");
    }

    #[test]
    fn test_copy_into_directory() {
        let volume = new_volume();
        volume.write("/test.txt", b"hello\nworld").unwrap();
        volume.mkdir_all("/dir2/dir3").unwrap();
        volume.copy("/test.txt", "/dir2/dir3", None).unwrap();
        assert_eq!(volume.read("/dir2/dir3/test.txt").unwrap(), b"hello\nworld");
        assert_eq!(volume.read("/test.txt").unwrap(), b"hello\nworld");
    }

    #[test]
    fn test_copy_tree() {
        let volume = new_volume();
        volume.mkdir_all("/src/inner").unwrap();
        volume.write("/src/inner/a.txt", b"A").unwrap();
        volume.write("/src/top.txt", b"T").unwrap();
        volume.copy("/src", "/backup", None).unwrap();
        assert_eq!(volume.read("/backup/inner/a.txt").unwrap(), b"A");
        assert_eq!(volume.read("/backup/top.txt").unwrap(), b"T");
    }

    #[test]
    fn test_delete_tree_post_order() {
        let volume = new_volume();
        volume.mkdir_all("/gone/deeper").unwrap();
        volume.write("/gone/deeper/x.bin", b"x").unwrap();
        let mut listener = CollectingListener::default();
        volume.delete("/gone", Some(&mut listener)).unwrap();
        assert!(!volume.exists("/gone").unwrap());
        assert_eq!(listener.events[0], ProgressEvent::FilesCounted(3));
        assert_eq!(*listener.events.last().unwrap(), ProgressEvent::OpComplete);
        // The file goes before its directories.
        let processed: Vec<&ProgressEvent> = listener
            .events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::FileProcessed(_)))
            .collect();
        assert_eq!(
            *processed[0],
            ProgressEvent::FileProcessed("/gone/deeper/x.bin".to_string())
        );
        assert_eq!(
            *processed[2],
            ProgressEvent::FileProcessed("/gone".to_string())
        );
    }

    #[test]
    fn test_full_scenario_write_move_copy() {
        let volume = new_volume();
        volume.write("/test.txt", b"hello\nworld").unwrap();
        volume.mkdir("/dir1").unwrap();
        volume.rename("/test.txt", "/dir1/test.txt", None).unwrap();
        volume.mkdir_all("/dir2/dir3").unwrap();
        volume.copy("/dir1/test.txt", "/dir2/dir3", None).unwrap();
        assert_eq!(volume.read("/dir1/test.txt").unwrap(), b"hello\nworld");
        assert_eq!(volume.read("/dir2/dir3/test.txt").unwrap(), b"hello\nworld");
    }

    #[test]
    fn test_external_chaining_move_reencrypts() {
        let profile = VolumeProfile {
            external_iv_chaining: true,
            kdf_duration_ms: 0,
            ..VolumeProfile::default()
        };
        let provider = MemoryFileProvider::new();
        let volume = Volume::create(provider.clone(), "pw", profile).unwrap();
        volume.mkdir("/directory").unwrap();
        volume
            .write("/directory/another-test-file.txt", b"external chaining")
            .unwrap();
        volume.mkdir("/elsewhere").unwrap();

        let old_raw = volume
            .file("/directory/another-test-file.txt")
            .unwrap()
            .encoded_path()
            .to_string();
        let old_stored = {
            let mut buf = Vec::new();
            provider
                .open_input(&old_raw)
                .unwrap()
                .read_to_end(&mut buf)
                .unwrap();
            buf
        };

        volume
            .rename(
                "/directory/another-test-file.txt",
                "/elsewhere/another-test-file.txt",
                None,
            )
            .unwrap();
        assert_eq!(
            volume.read("/elsewhere/another-test-file.txt").unwrap(),
            b"external chaining"
        );

        let new_raw = volume
            .file("/elsewhere/another-test-file.txt")
            .unwrap()
            .encoded_path()
            .to_string();
        let new_stored = {
            let mut buf = Vec::new();
            provider
                .open_input(&new_raw)
                .unwrap()
                .read_to_end(&mut buf)
                .unwrap();
            buf
        };
        // The header (and with it the whole first block) was re-sealed.
        assert_ne!(old_stored, new_stored);
    }

    #[test]
    fn test_stream_filenames_volume() {
        let profile = VolumeProfile {
            name_alg: FilenameAlgorithm::Stream,
            ..quick_profile()
        };
        let volume = Volume::create(MemoryFileProvider::new(), "pw", profile).unwrap();
        volume.mkdir("/dir").unwrap();
        volume
            .write("/dir/testfile.txt", b"stream name algorithm\n")
            .unwrap();
        let listing = volume.list_dir("/dir").unwrap();
        assert_eq!(listing[0].name(), "testfile.txt");
        assert_eq!(
            volume.read("/dir/testfile.txt").unwrap(),
            b"stream name algorithm\n"
        );
    }

    #[test]
    fn test_deterministic_ciphertext_without_unique_iv() {
        let profile = VolumeProfile {
            unique_iv: false,
            ..quick_profile()
        };
        let provider = MemoryFileProvider::new();
        let volume = Volume::create(provider.clone(), "pw", profile).unwrap();
        volume.write("/testfile.txt", b"fixed content").unwrap();
        let raw_path = volume.file("/testfile.txt").unwrap().encoded_path().to_string();
        let first = {
            let mut buf = Vec::new();
            provider
                .open_input(&raw_path)
                .unwrap()
                .read_to_end(&mut buf)
                .unwrap();
            buf
        };
        volume.write("/testfile.txt", b"fixed content").unwrap();
        let second = {
            let mut buf = Vec::new();
            provider
                .open_input(&raw_path)
                .unwrap()
                .read_to_end(&mut buf)
                .unwrap();
            buf
        };
        assert_eq!(first, second);
    }

    #[test]
    fn test_rename_into_itself_is_rejected() {
        let volume = new_volume();
        volume.mkdir("/dir").unwrap();
        assert!(volume.rename("/dir", "/dir/sub", None).is_err());
        assert!(volume.rename("/dir", "/dir", None).is_err());
    }

    #[test]
    fn test_config_file_hidden_from_listing() {
        let volume = new_volume();
        assert!(volume.list_dir("/").unwrap().is_empty());
    }
}
