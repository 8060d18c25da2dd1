#![forbid(unsafe_code)]

//! fileman: scheduled, age-based retention cleanup for watched directories.
//!
//! On every cron tick each watched directory is listed, every entry is aged
//! from its last-modified time, and plain files older than the directory's
//! threshold are deleted. Directories are never removed and nothing below the
//! first level is visited.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use fileman::prelude::*;
//!
//! let enforcer = RetentionEnforcer::new(Arc::new(LocalFileSystem), Arc::new(SystemClock));
//! let report = enforcer.delete_old_files(Path::new("/var/spool/reports"), 7.0);
//! for path in &report.deleted {
//!     println!("deleted {}", path.display());
//! }
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod logger;
pub mod platform;
pub mod scanner;
