//! Directory scanner: one directory's immediate entries as age-annotated records.
//!
//! The scanner is read-only. A directory that cannot be listed is an error for
//! the caller; an entry whose metadata cannot be read becomes a record carrying
//! that failure, and the scan carries on with its siblings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::clock::Clock;
use crate::core::errors::{FmError, Result};
use crate::platform::fs::FileSystem;

/// One entry produced by a directory scan.
///
/// Either `failure` is set and every positional field is left at its zero
/// value, or `failure` is `None` and all fields are populated.
#[derive(Debug, Default)]
pub struct FileRecord {
    /// Entry name for display; lossy if the on-disk name is not UTF-8.
    pub name: String,
    /// Exact on-disk path, the one deletes act on.
    pub path: PathBuf,
    /// Last-modified time, Unix epoch seconds.
    pub created_at: i64,
    /// Fractional days since `created_at`.
    pub age: f64,
    /// Whether the entry itself is a directory. Symlinks are not followed.
    pub is_dir: bool,
    /// Metadata failure for this entry, if any.
    pub failure: Option<FmError>,
}

impl FileRecord {
    fn unresolved(name: String, failure: FmError) -> Self {
        Self {
            name,
            failure: Some(failure),
            ..Self::default()
        }
    }

    /// Whether metadata was retrieved for this entry.
    pub fn is_resolved(&self) -> bool {
        self.failure.is_none()
    }
}

/// Lists a directory through the filesystem collaborator.
#[derive(Clone)]
pub struct DirectoryScanner {
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
}

impl DirectoryScanner {
    /// Scanner reading through `fs` and aging against `clock`.
    pub fn new(fs: Arc<dyn FileSystem>, clock: Arc<dyn Clock>) -> Self {
        Self { fs, clock }
    }

    /// Scan the immediate children of `directory`, in listing order.
    pub fn list_files(&self, directory: &Path) -> Result<Vec<FileRecord>> {
        let entries = self.fs.read_dir(directory)?;

        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = entry.name();
            let record = match entry.info() {
                Ok(info) => FileRecord {
                    path: entry.path(),
                    name,
                    created_at: info.modified_epoch_secs,
                    age: self.clock.calculate_age(info.modified_epoch_secs),
                    is_dir: info.is_dir,
                    failure: None,
                },
                Err(failure) => FileRecord::unresolved(name, failure),
            };
            records.push(record);
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FixedClock;
    use crate::platform::fs::{MockEntry, MockFileSystem};
    use std::io::ErrorKind;

    const NOW: i64 = 1_755_907_200 + 3 * 86_400;

    fn scanner(mock: MockFileSystem) -> DirectoryScanner {
        DirectoryScanner::new(Arc::new(mock), Arc::new(FixedClock::new(NOW)))
    }

    #[test]
    fn lists_single_file_with_all_fields() {
        let mock = MockFileSystem::new()
            .with_dir("foo/bar", vec![MockEntry::file("file1.txt", 1_755_907_200)]);

        let records = scanner(mock).list_files(Path::new("foo/bar")).unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.name, "file1.txt");
        assert_eq!(record.path, PathBuf::from("foo/bar/file1.txt"));
        assert_eq!(record.created_at, 1_755_907_200);
        assert!((record.age - 3.0).abs() < 1e-9);
        assert!(!record.is_dir);
        assert!(record.is_resolved());
    }

    #[test]
    fn unreadable_directory_is_surfaced() {
        let mock =
            MockFileSystem::new().with_unreadable_dir("foo/bar", ErrorKind::PermissionDenied, "foo");

        let err = scanner(mock).list_files(Path::new("foo/bar")).unwrap_err();

        assert_eq!(err.code(), "FM-2001");
        assert!(err.to_string().contains("foo/bar"));
    }

    #[test]
    fn metadata_failure_keeps_name_and_zeroes_the_rest() {
        let mock = MockFileSystem::new().with_dir(
            "foo/bar",
            vec![MockEntry::broken("file1.txt", ErrorKind::Other, "error")],
        );

        let records = scanner(mock).list_files(Path::new("foo/bar")).unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.name, "file1.txt");
        assert_eq!(record.path, PathBuf::new());
        assert_eq!(record.created_at, 0);
        assert!(record.age == 0.0);
        assert!(!record.is_dir);
        let failure = record.failure.as_ref().unwrap();
        assert_eq!(failure.code(), "FM-2002");
        assert!(failure.to_string().contains("error"));
    }

    #[test]
    fn one_bad_entry_does_not_abort_the_scan() {
        let mock = MockFileSystem::new().with_dir(
            "d",
            vec![
                MockEntry::file("a", NOW),
                MockEntry::broken("b", ErrorKind::NotFound, "vanished"),
                MockEntry::dir("c", NOW - 86_400),
            ],
        );

        let records = scanner(mock).list_files(Path::new("d")).unwrap();

        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(records[0].is_resolved());
        assert!(!records[1].is_resolved());
        assert!(records[2].is_resolved());
        assert!(records[2].is_dir);
        assert!((records[2].age - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_directory_yields_no_records() {
        let mock = MockFileSystem::new().with_dir("empty", Vec::new());
        let records = scanner(mock).list_files(Path::new("empty")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn record_at_current_instant_has_zero_age() {
        let mock = MockFileSystem::new().with_dir("d", vec![MockEntry::file("now", NOW)]);
        let records = scanner(mock).list_files(Path::new("d")).unwrap();
        assert!(records[0].age == 0.0);
    }

    #[test]
    fn scanner_never_deletes() {
        let mock = Arc::new(
            MockFileSystem::new().with_dir("d", vec![MockEntry::file("ancient", 0)]),
        );
        let scanner = DirectoryScanner::new(mock.clone(), Arc::new(FixedClock::new(NOW)));

        scanner.list_files(Path::new("d")).unwrap();

        assert!(mock.delete_requests().is_empty());
        assert_eq!(mock.entry_names(Path::new("d")), vec!["ancient"]);
    }
}
