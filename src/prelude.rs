//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use fileman::prelude::*;
//! ```

// Core
pub use crate::core::clock::{Clock, FixedClock, SystemClock};
pub use crate::core::config::{Config, OverlapPolicy, WatchedDirectory};
pub use crate::core::errors::{FmError, Result};

// Platform
pub use crate::platform::fs::{DirEntry, EntryInfo, FileSystem, LocalFileSystem};

// Scanner
pub use crate::scanner::listing::{DirectoryScanner, FileRecord};
pub use crate::scanner::retention::{RetentionEnforcer, RetentionReport};

// Scheduling
pub use crate::daemon::scheduler::{Job, JobRegistry, WorkerPool};

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
