//! Filesystem collaborator: directory listing, per-entry metadata, single-file delete.
//!
//! The retention engine only ever talks to [`FileSystem`]. [`LocalFileSystem`]
//! is the production implementation on top of `std::fs`; [`MockFileSystem`]
//! is an in-memory double with scripted failures for deterministic tests.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::core::errors::{FmError, Result};

/// Metadata the retention engine needs for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    /// Last-modified time as Unix epoch seconds.
    pub modified_epoch_secs: i64,
    pub is_dir: bool,
}

/// One immediate child of a listed directory.
///
/// The name is always available; metadata is fetched lazily and may fail on
/// its own without affecting sibling entries.
/// [`DirEntry::name`] is for display and may be lossy on non-UTF-8 names.
/// [`DirEntry::path`] is the exact on-disk path and is what deletes must use.
pub trait DirEntry: Send {
    fn name(&self) -> String;
    fn path(&self) -> PathBuf;
    fn info(&self) -> Result<EntryInfo>;
}

/// Read/delete primitives consumed by the scanner and the enforcer.
pub trait FileSystem: Send + Sync {
    /// Immediate entries of `path`, in listing order.
    fn read_dir(&self, path: &Path) -> Result<Vec<Box<dyn DirEntry>>>;
    /// Remove a single file.
    fn delete_file(&self, path: &Path) -> Result<()>;
}

// ──────────────────── local filesystem ────────────────────

/// `std::fs`-backed implementation.
///
/// Listings are sorted by file name so that scan order is stable across
/// platforms. Metadata is taken without following symlinks: a link is aged
/// by its own mtime and deleting it never touches the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

struct LocalEntry {
    entry: fs::DirEntry,
    dir: PathBuf,
    file_name: OsString,
    name: String,
}

impl DirEntry for LocalEntry {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    fn info(&self) -> Result<EntryInfo> {
        let meta = self.entry.metadata().map_err(|source| self.metadata_error(source))?;
        let modified = meta
            .modified()
            .map_err(|source| self.metadata_error(source))?;
        Ok(EntryInfo {
            modified_epoch_secs: epoch_secs(modified),
            is_dir: meta.is_dir(),
        })
    }
}

impl LocalEntry {
    fn metadata_error(&self, source: io::Error) -> FmError {
        FmError::EntryMetadata {
            dir: self.dir.clone(),
            name: self.name.clone(),
            source,
        }
    }
}

impl FileSystem for LocalFileSystem {
    fn read_dir(&self, path: &Path) -> Result<Vec<Box<dyn DirEntry>>> {
        let entries = fs::read_dir(path).map_err(|e| FmError::directory_read(path, e))?;

        let mut listed = Vec::new();
        for entry_result in entries {
            let entry = entry_result.map_err(|e| FmError::directory_read(path, e))?;
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy().into_owned();
            listed.push(LocalEntry {
                entry,
                dir: path.to_path_buf(),
                file_name,
                name,
            });
        }
        listed.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        Ok(listed
            .into_iter()
            .map(|e| Box::new(e) as Box<dyn DirEntry>)
            .collect())
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| FmError::delete(path, e))
    }
}

/// Convert a `SystemTime` to whole epoch seconds (negative before 1970).
fn epoch_secs(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp()
}

// ──────────────────── mock filesystem ────────────────────

/// Scripted metadata outcome for a mock entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockInfo {
    Ok(EntryInfo),
    Err(io::ErrorKind, String),
}

/// One scripted directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockEntry {
    pub name: String,
    pub info: MockInfo,
}

impl MockEntry {
    /// Plain file modified at `modified_epoch_secs`.
    #[must_use]
    pub fn file(name: &str, modified_epoch_secs: i64) -> Self {
        Self {
            name: name.to_string(),
            info: MockInfo::Ok(EntryInfo {
                modified_epoch_secs,
                is_dir: false,
            }),
        }
    }

    /// Subdirectory modified at `modified_epoch_secs`.
    #[must_use]
    pub fn dir(name: &str, modified_epoch_secs: i64) -> Self {
        Self {
            name: name.to_string(),
            info: MockInfo::Ok(EntryInfo {
                modified_epoch_secs,
                is_dir: true,
            }),
        }
    }

    /// Entry whose metadata lookup fails.
    #[must_use]
    pub fn broken(name: &str, kind: io::ErrorKind, message: &str) -> Self {
        Self {
            name: name.to_string(),
            info: MockInfo::Err(kind, message.to_string()),
        }
    }
}

struct MockDirEntry {
    dir: PathBuf,
    entry: MockEntry,
}

impl DirEntry for MockDirEntry {
    fn name(&self) -> String {
        self.entry.name.clone()
    }

    fn path(&self) -> PathBuf {
        self.dir.join(&self.entry.name)
    }

    fn info(&self) -> Result<EntryInfo> {
        match &self.entry.info {
            MockInfo::Ok(info) => Ok(*info),
            MockInfo::Err(kind, message) => Err(FmError::EntryMetadata {
                dir: self.dir.clone(),
                name: self.entry.name.clone(),
                source: io::Error::new(*kind, message.clone()),
            }),
        }
    }
}

/// In-memory filesystem for deterministic tests.
///
/// Successful deletes remove the entry from its directory, so consecutive
/// passes observe earlier deletions. Every delete request is recorded,
/// including failed ones.
#[derive(Debug, Default)]
pub struct MockFileSystem {
    dirs: Mutex<HashMap<PathBuf, Vec<MockEntry>>>,
    unreadable: HashMap<PathBuf, (io::ErrorKind, String)>,
    delete_failures: HashMap<PathBuf, (io::ErrorKind, String)>,
    delete_requests: Mutex<Vec<PathBuf>>,
}

impl MockFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a directory listing.
    #[must_use]
    pub fn with_dir(self, path: impl Into<PathBuf>, entries: Vec<MockEntry>) -> Self {
        self.dirs.lock().insert(path.into(), entries);
        self
    }

    /// Make listing `path` fail.
    #[must_use]
    pub fn with_unreadable_dir(
        mut self,
        path: impl Into<PathBuf>,
        kind: io::ErrorKind,
        message: &str,
    ) -> Self {
        self.unreadable
            .insert(path.into(), (kind, message.to_string()));
        self
    }

    /// Make deleting `path` fail.
    #[must_use]
    pub fn with_delete_failure(
        mut self,
        path: impl Into<PathBuf>,
        kind: io::ErrorKind,
        message: &str,
    ) -> Self {
        self.delete_failures
            .insert(path.into(), (kind, message.to_string()));
        self
    }

    /// Every path passed to `delete_file`, in call order.
    pub fn delete_requests(&self) -> Vec<PathBuf> {
        self.delete_requests.lock().clone()
    }

    /// Names currently listed under `path`.
    pub fn entry_names(&self, path: &Path) -> Vec<String> {
        self.dirs
            .lock()
            .get(path)
            .map(|entries| entries.iter().map(|e| e.name.clone()).collect())
            .unwrap_or_default()
    }
}

impl FileSystem for MockFileSystem {
    fn read_dir(&self, path: &Path) -> Result<Vec<Box<dyn DirEntry>>> {
        if let Some((kind, message)) = self.unreadable.get(path) {
            return Err(FmError::directory_read(
                path,
                io::Error::new(*kind, message.clone()),
            ));
        }
        let dirs = self.dirs.lock();
        let entries = dirs.get(path).ok_or_else(|| {
            FmError::directory_read(
                path,
                io::Error::new(io::ErrorKind::NotFound, "no such directory"),
            )
        })?;
        Ok(entries
            .iter()
            .map(|entry| {
                Box::new(MockDirEntry {
                    dir: path.to_path_buf(),
                    entry: entry.clone(),
                }) as Box<dyn DirEntry>
            })
            .collect())
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        self.delete_requests.lock().push(path.to_path_buf());

        if let Some((kind, message)) = self.delete_failures.get(path) {
            return Err(FmError::delete(path, io::Error::new(*kind, message.clone())));
        }

        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return Err(FmError::delete(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"),
            ));
        };
        let name = name.to_string_lossy();
        let mut dirs = self.dirs.lock();
        let entries = dirs.get_mut(parent).ok_or_else(|| {
            FmError::delete(
                path,
                io::Error::new(io::ErrorKind::NotFound, "no such directory"),
            )
        })?;
        let before = entries.len();
        entries.retain(|e| e.name != name);
        if entries.len() == before {
            return Err(FmError::delete(
                path,
                io::Error::new(io::ErrorKind::NotFound, "no such file"),
            ));
        }
        Ok(())
    }
}
