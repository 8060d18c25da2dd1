//! Retention enforcer: one scan-and-delete pass over a watched directory.
//!
//! Policy, applied per record in scan order:
//! 1. Records whose metadata failed go to `failures` and are never deleted.
//! 2. Directories are never deleted.
//! 3. Files with `age <= threshold` are kept.
//! 4. Everything else is deleted; a failed delete is recorded and the pass
//!    continues with the next record.
//!
//! A directory that cannot be listed yields a report whose only content is
//! that error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::clock::Clock;
use crate::core::errors::FmError;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::platform::fs::FileSystem;
use crate::scanner::listing::DirectoryScanner;

/// Outcome of one enforcement pass over one directory.
#[derive(Debug)]
pub struct RetentionReport {
    /// Directory the pass ran over.
    pub directory: PathBuf,
    /// Age threshold applied, in days.
    pub threshold_days: f64,
    /// Paths removed, in scan order.
    pub deleted: Vec<PathBuf>,
    /// Directory-read, entry-metadata, and delete failures, in discovery order.
    pub failures: Vec<FmError>,
    /// Entries returned by the listing, including failed ones.
    pub records_scanned: usize,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl RetentionReport {
    fn new(directory: &Path, threshold_days: f64) -> Self {
        Self {
            directory: directory.to_path_buf(),
            threshold_days,
            deleted: Vec::new(),
            failures: Vec::new(),
            records_scanned: 0,
            duration: Duration::ZERO,
        }
    }

    /// No deletions and no failures: nothing to do this tick.
    pub fn is_noop(&self) -> bool {
        self.deleted.is_empty() && self.failures.is_empty()
    }
}

/// Applies the age threshold to a scanned directory and deletes expired files.
#[derive(Clone)]
pub struct RetentionEnforcer {
    scanner: DirectoryScanner,
    fs: Arc<dyn FileSystem>,
    logger: Option<ActivityLoggerHandle>,
}

impl RetentionEnforcer {
    /// Enforcer deleting through `fs`, aging against `clock`, without logging.
    pub fn new(fs: Arc<dyn FileSystem>, clock: Arc<dyn Clock>) -> Self {
        Self {
            scanner: DirectoryScanner::new(Arc::clone(&fs), clock),
            fs,
            logger: None,
        }
    }

    /// Emit activity events for every deletion, failure, and pass summary.
    #[must_use]
    pub fn with_logger(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    /// The scanner used for listings, for read-only views such as `fileman list`.
    pub fn scanner(&self) -> &DirectoryScanner {
        &self.scanner
    }

    /// Delete plain files in `directory` strictly older than `threshold_days`.
    pub fn delete_old_files(&self, directory: &Path, threshold_days: f64) -> RetentionReport {
        let start = Instant::now();
        let mut report = RetentionReport::new(directory, threshold_days);

        match self.scanner.list_files(directory) {
            Err(err) => report.failures.push(err),
            Ok(records) => {
                report.records_scanned = records.len();
                for record in records {
                    if let Some(failure) = record.failure {
                        report.failures.push(failure);
                        continue;
                    }
                    if record.is_dir || record.age <= threshold_days {
                        continue;
                    }

                    match self.fs.delete_file(&record.path) {
                        Ok(()) => {
                            self.log_event(ActivityEvent::FileDeleted {
                                directory: directory.to_string_lossy().to_string(),
                                path: record.path.to_string_lossy().to_string(),
                                age_days: record.age,
                            });
                            report.deleted.push(record.path);
                        }
                        Err(err) => report.failures.push(err),
                    }
                }
            }
        }

        report.duration = start.elapsed();
        self.log_report(&report);
        report
    }

    // ──────────────────── logging helpers ────────────────────

    fn log_event(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }

    fn log_report(&self, report: &RetentionReport) {
        if self.logger.is_none() {
            return;
        }
        let directory = report.directory.to_string_lossy().to_string();
        for failure in &report.failures {
            self.log_event(ActivityEvent::PassFailure {
                directory: directory.clone(),
                code: failure.code().to_string(),
                message: failure.to_string(),
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = report.duration.as_millis() as u64;
        self.log_event(ActivityEvent::PassCompleted {
            directory,
            records_scanned: report.records_scanned,
            deleted: report.deleted.len(),
            failures: report.failures.len(),
            duration_ms,
        });
    }
}
