//! File provider over a host directory.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::EncfsError;

use super::{components, validate_path, FileInfo, FileProvider};

/// Provider rooted at an existing host directory. Logical `/` maps to the
/// root directory; components never escape it.
pub struct LocalFileProvider {
    root: PathBuf,
}

impl LocalFileProvider {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, EncfsError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(EncfsError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("not a directory: {}", root.display()),
            )));
        }
        Ok(Self { root })
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, EncfsError> {
        validate_path(path)?;
        let mut resolved = self.root.clone();
        for component in components(path) {
            if component == "." || component == ".." {
                return Err(EncfsError::corrupt(format!(
                    "path escapes the volume root: {}",
                    path
                )));
            }
            resolved.push(component);
        }
        Ok(resolved)
    }

    fn info_for(&self, logical: &str, host: &Path) -> Result<FileInfo, EncfsError> {
        let metadata = fs::metadata(host)?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(FileInfo {
            path: logical.to_string(),
            name: super::file_name(logical).unwrap_or("").to_string(),
            directory: metadata.is_dir(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified,
        })
    }
}

impl FileProvider for LocalFileProvider {
    fn exists(&self, path: &str) -> Result<bool, EncfsError> {
        Ok(self.resolve(path)?.exists())
    }

    fn is_directory(&self, path: &str) -> Result<bool, EncfsError> {
        Ok(self.resolve(path)?.is_dir())
    }

    fn list_files(&self, path: &str) -> Result<Vec<FileInfo>, EncfsError> {
        let dir = self.resolve(path)?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let logical = super::join(path, &name);
            entries.push(self.info_for(&logical, &entry.path())?);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn create_file(&self, path: &str) -> Result<FileInfo, EncfsError> {
        let host = self.resolve(path)?;
        File::create(&host)?;
        self.info_for(path, &host)
    }

    fn mkdir(&self, path: &str) -> Result<(), EncfsError> {
        fs::create_dir(self.resolve(path)?)?;
        Ok(())
    }

    fn rename(&self, src: &str, dst: &str) -> Result<(), EncfsError> {
        fs::rename(self.resolve(src)?, self.resolve(dst)?)?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), EncfsError> {
        let host = self.resolve(path)?;
        if host.is_dir() {
            fs::remove_dir(host)?;
        } else {
            fs::remove_file(host)?;
        }
        Ok(())
    }

    fn copy(&self, src: &str, dst: &str) -> Result<(), EncfsError> {
        fs::copy(self.resolve(src)?, self.resolve(dst)?)?;
        Ok(())
    }

    fn open_input(&self, path: &str) -> Result<Box<dyn Read>, EncfsError> {
        let file = File::open(self.resolve(path)?)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn open_output(&self, path: &str, _length: Option<u64>) -> Result<Box<dyn Write>, EncfsError> {
        let file = File::create(self.resolve(path)?)?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn file_info(&self, path: &str) -> Result<FileInfo, EncfsError> {
        let host = self.resolve(path)?;
        self.info_for(path, &host)
    }
}
