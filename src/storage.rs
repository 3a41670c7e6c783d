//! # Storage Gateway
//!
//! Byte-stream access to named files under a single mounted root directory. The root
//! plays the part of the flash filesystem: it is mounted once at startup and every
//! name handed to the gateway is a plain file name inside it.
//!
//! The gateway itself does no locking. Reads and writes of the upload slot go through
//! [`AudioResource`](crate::audio::coordinator::AudioResource), which is only reachable while the
//! shared audio lock is held.

use anyhow::{Context, Result};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tracing::{debug, info};

/// Handle to the mounted storage root.
///
/// Cheap to clone; every clone refers to the same directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Mount the storage root, creating it when it does not exist yet.
    ///
    /// ## Errors:
    /// Fails when the directory cannot be created or the path exists but is not a
    /// directory. Callers treat this as fatal: nothing works without storage.
    pub fn mount(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create storage root {}", root.display()))?;

        let metadata = std::fs::metadata(&root)
            .with_context(|| format!("Failed to stat storage root {}", root.display()))?;
        if !metadata.is_dir() {
            anyhow::bail!("Storage root {} is not a directory", root.display());
        }

        info!(root = %root.display(), "Storage mounted");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a named file inside the root.
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Open a named file for reading.
    pub async fn open_read(&self, name: &str) -> io::Result<File> {
        File::open(self.path(name)).await
    }

    /// Create (or truncate) a named file for writing.
    pub async fn create(&self, name: &str) -> io::Result<File> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.path(name))
            .await
    }

    /// Atomically move `from` over `to`, replacing whatever `to` held.
    pub async fn replace(&self, from: &str, to: &str) -> io::Result<()> {
        fs::rename(self.path(from), self.path(to)).await
    }

    /// Remove a named file. A file that is already gone is not an error.
    pub async fn remove(&self, name: &str) -> io::Result<()> {
        match fs::remove_file(self.path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(file = name, "Nothing to remove");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Size of a named file, or `None` when it does not exist.
    pub async fn size(&self, name: &str) -> io::Result<Option<u64>> {
        match fs::metadata(self.path(name)).await {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read a whole named file into memory. Used for small documents only.
    pub async fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path(name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_mount_creates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("flash");
        let storage = Storage::mount(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(storage.root(), root.as_path());
    }

    #[test]
    fn test_mount_rejects_file_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("not-a-dir");
        std::fs::write(&root, b"x").unwrap();
        assert!(Storage::mount(&root).is_err());
    }

    #[tokio::test]
    async fn test_create_truncates_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::mount(dir.path()).unwrap();

        let mut file = storage.create("slot.wav").await.unwrap();
        file.write_all(b"0123456789").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        let mut file = storage.create("slot.wav").await.unwrap();
        file.write_all(b"abc").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        let mut content = Vec::new();
        storage
            .open_read("slot.wav")
            .await
            .unwrap()
            .read_to_end(&mut content)
            .await
            .unwrap();
        assert_eq!(content, b"abc");
        assert_eq!(storage.size("slot.wav").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_replace_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::mount(dir.path()).unwrap();
        std::fs::write(storage.path("slot.wav"), b"old").unwrap();
        std::fs::write(storage.path("slot.wav.part"), b"new").unwrap();

        storage.replace("slot.wav.part", "slot.wav").await.unwrap();
        assert_eq!(storage.read("slot.wav").await.unwrap(), b"new");
        assert_eq!(storage.size("slot.wav.part").await.unwrap(), None);

        storage.remove("slot.wav").await.unwrap();
        // Removing twice is fine
        storage.remove("slot.wav").await.unwrap();
        assert!(storage.open_read("slot.wav").await.is_err());
    }
}
