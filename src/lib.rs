//! EncFS-compatible encrypted volume library.
//!
//! Opens, reads, writes and creates volumes in the EncFS 1.7.4 on-disk
//! format: every file name and every content block in the backing store is
//! individually encrypted with keys derived from a passphrase. Storage is
//! pluggable through [`FileProvider`]; local-directory and in-memory
//! providers ship with the crate.
//!
//! ```no_run
//! use encfsr::{LocalFileProvider, Volume, VolumeProfile};
//!
//! # fn main() -> Result<(), encfsr::EncfsError> {
//! let provider = LocalFileProvider::new("/path/to/raw")?;
//! let volume = Volume::create(provider, "secret", VolumeProfile::default())?;
//! volume.write("/notes.txt", b"only readable with the passphrase")?;
//! for entry in volume.list_dir("/")? {
//!     println!("{} ({} bytes)", entry.path(), entry.size());
//! }
//! # Ok(())
//! # }
//! ```

mod b64;
mod config;
mod content;
mod crypto;
mod error;
mod keys;
mod names;
mod progress;
pub mod provider;
mod stream;
mod volume;

pub use config::{FilenameAlgorithm, VolumeConfig, VolumeProfile, CONFIG_FILE_NAME};
pub use content::BlockLayout;
pub use crypto::KeySize;
pub use error::EncfsError;
pub use keys::benchmark_iterations;
pub use progress::{CollectingListener, ProgressEvent, ProgressListener};
pub use provider::{
    FileInfo, FileProvider, LocalFileProvider, MemoryFileProvider, PATH_SEPARATOR, ROOT_PATH,
};
pub use stream::{EncfsReader, EncfsWriter};
pub use volume::{EncFile, Volume};
