//! In-memory file provider. Backs the test suite and lets callers stage a
//! volume without touching the host filesystem.

use std::collections::BTreeMap;
use std::io::{Cursor, Error as IoError, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::EncfsError;

use super::{parent, validate_path, FileInfo, FileProvider, ROOT_PATH};

#[derive(Clone)]
enum Entry {
    Directory,
    File(Vec<u8>),
}

#[derive(Default)]
struct MemoryFs {
    entries: BTreeMap<String, Entry>,
}

/// Provider holding everything in a path → entry map. Cloning shares the
/// underlying store.
#[derive(Clone)]
pub struct MemoryFileProvider {
    fs: Arc<Mutex<MemoryFs>>,
}

impl Default for MemoryFileProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileProvider {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(ROOT_PATH.to_string(), Entry::Directory);
        Self {
            fs: Arc::new(Mutex::new(MemoryFs { entries })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryFs>, EncfsError> {
        self.fs
            .lock()
            .map_err(|_| EncfsError::Io(IoError::new(ErrorKind::Other, "provider lock poisoned")))
    }

    fn require_parent_dir(fs: &MemoryFs, path: &str) -> Result<(), EncfsError> {
        if let Some(parent_path) = parent(path) {
            match fs.entries.get(parent_path) {
                Some(Entry::Directory) => Ok(()),
                Some(Entry::File(_)) => Err(not_a_directory(parent_path)),
                None => Err(not_found(parent_path)),
            }
        } else {
            Err(EncfsError::corrupt("root cannot be created"))
        }
    }
}

fn not_found(path: &str) -> EncfsError {
    EncfsError::Io(IoError::new(
        ErrorKind::NotFound,
        format!("no such entry: {}", path),
    ))
}

fn not_a_directory(path: &str) -> EncfsError {
    EncfsError::Io(IoError::new(
        ErrorKind::Other,
        format!("not a directory: {}", path),
    ))
}

impl FileProvider for MemoryFileProvider {
    fn exists(&self, path: &str) -> Result<bool, EncfsError> {
        validate_path(path)?;
        Ok(self.lock()?.entries.contains_key(path))
    }

    fn is_directory(&self, path: &str) -> Result<bool, EncfsError> {
        validate_path(path)?;
        Ok(matches!(
            self.lock()?.entries.get(path),
            Some(Entry::Directory)
        ))
    }

    fn list_files(&self, path: &str) -> Result<Vec<FileInfo>, EncfsError> {
        validate_path(path)?;
        let fs = self.lock()?;
        match fs.entries.get(path) {
            Some(Entry::Directory) => {}
            Some(Entry::File(_)) => return Err(not_a_directory(path)),
            None => return Err(not_found(path)),
        }
        let mut out = Vec::new();
        for (entry_path, entry) in fs.entries.iter() {
            if parent(entry_path) == Some(path) {
                out.push(info_for(entry_path, entry));
            }
        }
        Ok(out)
    }

    fn create_file(&self, path: &str) -> Result<FileInfo, EncfsError> {
        validate_path(path)?;
        let mut fs = self.lock()?;
        Self::require_parent_dir(&fs, path)?;
        fs.entries.insert(path.to_string(), Entry::File(Vec::new()));
        Ok(info_for(path, &Entry::File(Vec::new())))
    }

    fn mkdir(&self, path: &str) -> Result<(), EncfsError> {
        validate_path(path)?;
        let mut fs = self.lock()?;
        if fs.entries.contains_key(path) {
            return Err(EncfsError::Io(IoError::new(
                ErrorKind::AlreadyExists,
                format!("entry already exists: {}", path),
            )));
        }
        Self::require_parent_dir(&fs, path)?;
        fs.entries.insert(path.to_string(), Entry::Directory);
        Ok(())
    }

    fn rename(&self, src: &str, dst: &str) -> Result<(), EncfsError> {
        validate_path(src)?;
        validate_path(dst)?;
        let mut fs = self.lock()?;
        if !fs.entries.contains_key(src) {
            return Err(not_found(src));
        }
        Self::require_parent_dir(&fs, dst)?;
        let prefix = format!("{}/", src);
        let moved: Vec<String> = fs
            .entries
            .keys()
            .filter(|k| *k == src || k.starts_with(&prefix))
            .cloned()
            .collect();
        for old in moved {
            if let Some(entry) = fs.entries.remove(&old) {
                let new = format!("{}{}", dst, &old[src.len()..]);
                fs.entries.insert(new, entry);
            }
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), EncfsError> {
        validate_path(path)?;
        let mut fs = self.lock()?;
        let prefix = format!("{}/", path);
        match fs.entries.get(path) {
            Some(Entry::Directory) => {
                if fs.entries.keys().any(|k| k.starts_with(&prefix)) {
                    return Err(EncfsError::Io(IoError::new(
                        ErrorKind::Other,
                        format!("directory not empty: {}", path),
                    )));
                }
            }
            Some(Entry::File(_)) => {}
            None => return Err(not_found(path)),
        }
        fs.entries.remove(path);
        Ok(())
    }

    fn copy(&self, src: &str, dst: &str) -> Result<(), EncfsError> {
        validate_path(src)?;
        validate_path(dst)?;
        let mut fs = self.lock()?;
        let data = match fs.entries.get(src) {
            Some(Entry::File(data)) => data.clone(),
            Some(Entry::Directory) => {
                return Err(EncfsError::Io(IoError::new(
                    ErrorKind::Other,
                    format!("cannot raw-copy a directory: {}", src),
                )));
            }
            None => return Err(not_found(src)),
        };
        Self::require_parent_dir(&fs, dst)?;
        fs.entries.insert(dst.to_string(), Entry::File(data));
        Ok(())
    }

    fn open_input(&self, path: &str) -> Result<Box<dyn Read>, EncfsError> {
        validate_path(path)?;
        let fs = self.lock()?;
        match fs.entries.get(path) {
            Some(Entry::File(data)) => Ok(Box::new(Cursor::new(data.clone()))),
            Some(Entry::Directory) => Err(not_a_directory(path)),
            None => Err(not_found(path)),
        }
    }

    fn open_output(&self, path: &str, _length: Option<u64>) -> Result<Box<dyn Write>, EncfsError> {
        validate_path(path)?;
        {
            let fs = self.lock()?;
            Self::require_parent_dir(&fs, path)?;
        }
        Ok(Box::new(MemoryWriter {
            path: path.to_string(),
            buf: Vec::new(),
            fs: Arc::clone(&self.fs),
        }))
    }

    fn file_info(&self, path: &str) -> Result<FileInfo, EncfsError> {
        validate_path(path)?;
        let fs = self.lock()?;
        fs.entries
            .get(path)
            .map(|entry| info_for(path, entry))
            .ok_or_else(|| not_found(path))
    }
}

fn info_for(path: &str, entry: &Entry) -> FileInfo {
    FileInfo {
        path: path.to_string(),
        name: super::file_name(path).unwrap_or("").to_string(),
        directory: matches!(entry, Entry::Directory),
        size: match entry {
            Entry::Directory => 0,
            Entry::File(data) => data.len() as u64,
        },
        modified: 0,
    }
}

/// Buffers writes and commits the file on flush and on drop.
struct MemoryWriter {
    path: String,
    buf: Vec<u8>,
    fs: Arc<Mutex<MemoryFs>>,
}

impl MemoryWriter {
    fn commit(&self) -> std::io::Result<()> {
        let mut fs = self
            .fs
            .lock()
            .map_err(|_| IoError::new(ErrorKind::Other, "provider lock poisoned"))?;
        fs.entries
            .insert(self.path.clone(), Entry::File(self.buf.clone()));
        Ok(())
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.commit()
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        if let Err(err) = self.commit() {
            log::warn!("failed to commit {}: {}", self.path, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_lifecycle() {
        let provider = MemoryFileProvider::new();
        {
            let mut out = provider.open_output("/f.bin", None).unwrap();
            out.write_all(b"abc").unwrap();
        }
        assert!(provider.exists("/f.bin").unwrap());
        assert_eq!(provider.file_info("/f.bin").unwrap().size, 3);
        let mut content = Vec::new();
        provider
            .open_input("/f.bin")
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, b"abc");
    }

    #[test]
    fn test_rename_moves_subtree() {
        let provider = MemoryFileProvider::new();
        provider.mkdir("/dir").unwrap();
        provider.mkdir("/dir/sub").unwrap();
        provider.create_file("/dir/sub/file").unwrap();
        provider.rename("/dir", "/moved").unwrap();
        assert!(!provider.exists("/dir").unwrap());
        assert!(provider.exists("/moved/sub/file").unwrap());
    }

    #[test]
    fn test_delete_refuses_non_empty_directory() {
        let provider = MemoryFileProvider::new();
        provider.mkdir("/dir").unwrap();
        provider.create_file("/dir/file").unwrap();
        assert!(provider.delete("/dir").is_err());
        provider.delete("/dir/file").unwrap();
        provider.delete("/dir").unwrap();
        assert!(!provider.exists("/dir").unwrap());
    }

    #[test]
    fn test_mkdir_requires_parent() {
        let provider = MemoryFileProvider::new();
        assert!(provider.mkdir("/a/b").is_err());
        provider.mkdir("/a").unwrap();
        assert!(provider.mkdir("/a/b").is_ok());
        assert!(provider.mkdir("/a").is_err());
    }

    #[test]
    fn test_listing_children_only() {
        let provider = MemoryFileProvider::new();
        provider.mkdir("/a").unwrap();
        provider.create_file("/a/inner").unwrap();
        provider.create_file("/top").unwrap();
        let root: Vec<String> = provider
            .list_files("/")
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(root, vec!["a", "top"]);
        let nested: Vec<String> = provider
            .list_files("/a")
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(nested, vec!["inner"]);
    }

    #[test]
    fn test_copy_is_file_only() {
        let provider = MemoryFileProvider::new();
        provider.mkdir("/dir").unwrap();
        {
            let mut out = provider.open_output("/src", None).unwrap();
            out.write_all(b"payload").unwrap();
        }
        provider.copy("/src", "/dst").unwrap();
        assert_eq!(provider.file_info("/dst").unwrap().size, 7);
        assert!(provider.copy("/dir", "/dir2").is_err());
    }
}
