//! # Storage Module
//!
//! Byte-level file primitives the tracker core depends on.
//!
//! The core never touches a file system directly: it names files relative to a
//! storage root and uses the [`Storage`] trait for create/append/read/rename/delete.
//! [`FsStorage`] implements it over a host directory (SD card mount point).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Persistent storage primitives on named files.
pub trait Storage: Send + Sync {
    /// Appends bytes to a file, creating it if absent.
    ///
    /// Returns the file size after the write.
    fn append(&self, name: &str, data: &[u8]) -> Result<u64>;

    /// Reads a whole file. `Ok(None)` if the file does not exist.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Replaces the contents of a file atomically (write then rename).
    fn write_atomic(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Creates an empty file if it does not exist yet.
    fn touch(&self, name: &str) -> Result<()>;

    /// Renames a file.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Deletes a file. Deleting a missing file is not an error.
    fn delete(&self, name: &str) -> Result<()>;

    /// Returns true if the file exists.
    fn exists(&self, name: &str) -> bool;

    /// Size in bytes, `None` if the file does not exist.
    fn size(&self, name: &str) -> Result<Option<u64>>;

    /// Lists file names in the storage root.
    fn list(&self) -> Result<Vec<String>>;
}

/// [`Storage`] backed by a directory on the host file system.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    /// Opens (and creates if needed) a storage root directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Storage for FsStorage {
    fn append(&self, name: &str, data: &[u8]) -> Result<u64> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(file.metadata()?.len())
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path(name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> Result<()> {
        let tmp = self.path(&format!("{}.tmp", name));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(tmp, self.path(name))?;
        Ok(())
    }

    fn touch(&self, name: &str) -> Result<()> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        fs::rename(self.path(from), self.path(to))?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    fn size(&self, name: &str) -> Result<Option<u64>> {
        match fs::metadata(self.path(name)) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
