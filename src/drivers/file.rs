use crate::driver::Driver;
use crate::error::LockError;
use log::*;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const SUFFIX: &str = ".lock";

/// Longest escaped stem kept verbatim. Longer ones are shortened to
/// `TRUNCATED_STEM` bytes plus `~` and the hex SHA-256 of the key, which
/// stays well under the usual 255-byte file name limit.
const MAX_STEM: usize = 200;
const TRUNCATED_STEM: usize = MAX_STEM - 1 - 64;

/// Driver that keeps one file per key in a shared directory.
///
/// `acquire` relies on `O_CREAT | O_EXCL` (`create_new`) being atomic, which
/// holds on local filesystems and on most shared ones; NFS before v3 is the
/// usual exception. The file body is the holder id, for humans.
#[derive(Debug, Clone)]
pub struct FileDriver {
    dir: PathBuf,
    id: String,
}

impl FileDriver {
    pub fn builder() -> FileDriverBuilder {
        FileDriverBuilder::default()
    }

    /// Driver over `dir` with a random holder id. The directory is created if
    /// missing.
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<FileDriver> {
        FileDriver::builder().dir(dir).build()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// File that represents `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name(key))
    }

    fn create(&self, path: &Path) -> io::Result<()> {
        let mut f = OpenOptions::new().write(true).create_new(true).open(path)?;
        if let Err(e) = f.write_all(self.id.as_bytes()) {
            // The key exists now; the body is informational only.
            warn!("[{}] writing holder id to {}: {e}", self.id, path.display());
        }

        Ok(())
    }
}

impl Driver for FileDriver {
    fn acquire(&self, key: &str) -> Result<(), LockError> {
        let path = self.path_for(key);
        match self.create(&path) {
            Ok(()) => {
                debug!("[{}] created {}", self.id, path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(LockError::acquire(key)),
            Err(e) => Err(LockError::acquire_with(key, e)),
        }
    }

    fn release(&self, key: &str) -> Result<(), LockError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("[{}] deleted {}", self.id, path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(LockError::release(key)),
            Err(e) => Err(LockError::release_with(key, e)),
        }
    }
}

/// Maps a key to a file name. ASCII alphanumerics, `-`, `_` and `.` pass
/// through, every other byte becomes `%XX`, so the mapping is injective.
/// Escaped names longer than [`MAX_STEM`] are cut and suffixed with `~` and
/// a digest of the whole key; `~` never survives escaping, so such names
/// cannot collide with short ones.
pub fn file_name(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for b in key.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => stem.push(b as char),
            _ => {
                let _ = write!(&mut stem, "%{b:02X}");
            }
        }
    }

    if stem.len() > MAX_STEM {
        // The stem is pure ASCII, any byte offset is a char boundary.
        stem.truncate(TRUNCATED_STEM);
        stem.push('~');
        stem.push_str(&hex::encode(Sha256::digest(key.as_bytes())));
    }

    stem.push_str(SUFFIX);
    stem
}

#[derive(Default)]
pub struct FileDriverBuilder {
    dir: Option<PathBuf>,
    id: Option<String>,
}

impl FileDriverBuilder {
    pub fn new() -> FileDriverBuilder {
        FileDriverBuilder::default()
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> FileDriverBuilder {
        self.dir = Some(dir.into());
        self
    }

    pub fn id(mut self, id: String) -> FileDriverBuilder {
        self.id = Some(id);
        self
    }

    pub fn build(self) -> anyhow::Result<FileDriver> {
        let dir = self
            .dir
            .ok_or_else(|| anyhow::anyhow!("lock directory not set"))?;
        fs::create_dir_all(&dir)?;
        let id = self.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        info!("file driver: dir={}, id={id}", dir.display());
        Ok(FileDriver { dir, id })
    }
}
