//! File-based storage backend for dataset files.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A dataset file on disk.
///
/// `flush()` pushes data to the OS, `sync()` calls `File::sync_all()`.
///
/// # Locking
///
/// [`FileBackend::lock_exclusive`] takes a non-blocking advisory lock on the
/// file. The lock lives as long as the backend, so a dataset opened by one
/// `LocalStore` cannot be opened for writing by a second handle.
///
/// # Example
///
/// ```no_run
/// use mapvault_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::create_new(Path::new("bay.mvds")).unwrap();
/// backend.lock_exclusive().unwrap();
/// backend.append(b"header").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens an existing dataset file for reading and appending.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the file does not exist.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_file(path, file)
    }

    /// Creates a new, empty dataset file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Fails with an `AlreadyExists` I/O error if the file is present.
    pub fn create_new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Self::from_file(path, file)
    }

    fn from_file(path: &Path, file: File) -> StorageResult<Self> {
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Takes an exclusive advisory lock on the file without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another handle holds the lock.
    pub fn lock_exclusive(&self) -> StorageResult<()> {
        self.file
            .read()
            .try_lock_exclusive()
            .map_err(|_| StorageError::Locked(self.path.clone()))
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        if data.is_empty() {
            return Ok(offset);
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_new_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bay.mvds");

        let backend = FileBackend::create_new(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn create_new_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bay.mvds");
        std::fs::write(&path, b"x").unwrap();

        let result = FileBackend::create_new(&path);
        assert!(matches!(result, Err(StorageError::Io(e)) if e.kind() == ErrorKind::AlreadyExists));
    }

    #[test]
    fn create_new_makes_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("offline").join("maps").join("bay.mvds");

        FileBackend::create_new(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn open_existing_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.mvds");

        let result = FileBackend::open_existing(&path);
        assert!(matches!(result, Err(StorageError::NotFound(p)) if p == path));
    }

    #[test]
    fn append_then_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bay.mvds");
        let mut backend = FileBackend::create_new(&path).unwrap();

        assert_eq!(backend.append(b"birds").unwrap(), 0);
        assert_eq!(backend.append(b"marine").unwrap(), 5);
        assert_eq!(backend.read_at(5, 6).unwrap(), b"marine");
        assert!(matches!(
            backend.read_at(8, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bay.mvds");

        {
            let mut backend = FileBackend::create_new(&path).unwrap();
            backend.append(b"committed rows").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open_existing(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 14);
        assert_eq!(backend.read_at(0, 14).unwrap(), b"committed rows");
    }

    #[test]
    fn truncate_drops_tail_and_appends_continue() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bay.mvds");
        let mut backend = FileBackend::create_new(&path).unwrap();

        backend.append(b"good-torn").unwrap();
        backend.truncate(4).unwrap();
        assert_eq!(backend.size().unwrap(), 4);

        let offset = backend.append(b"!").unwrap();
        assert_eq!(offset, 4);
        assert_eq!(backend.read_at(0, 5).unwrap(), b"good!");

        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::InvalidTruncate { requested: 100, size: 5 })
        ));
    }

    #[test]
    fn second_lock_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bay.mvds");

        let first = FileBackend::create_new(&path).unwrap();
        first.lock_exclusive().unwrap();

        let second = FileBackend::open_existing(&path).unwrap();
        assert!(matches!(second.lock_exclusive(), Err(StorageError::Locked(_))));

        drop(first);
        let third = FileBackend::open_existing(&path).unwrap();
        third.lock_exclusive().unwrap();
    }
}
