//! FM-prefixed error types with structured error codes.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, FmError>;

/// Top-level error type for fileman.
#[derive(Debug, Error)]
pub enum FmError {
    /// A config value failed validation.
    #[error("[FM-1001] invalid configuration: {details}")]
    InvalidConfig {
        /// What was wrong, naming the offending key.
        details: String,
    },

    /// The resolved config file does not exist.
    #[error("[FM-1002] missing configuration file: {path}")]
    MissingConfig {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// A config document or env value could not be parsed.
    #[error("[FM-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        /// Surface being parsed (`json`, `toml`, `env`).
        context: &'static str,
        /// Parser message.
        details: String,
    },

    /// A cron expression was rejected after normalization.
    #[error("[FM-1004] invalid cron expression {expression:?}: {details}")]
    InvalidCron {
        /// Expression as configured.
        expression: String,
        /// Parser message.
        details: String,
    },

    /// A watched directory could not be listed.
    #[error("[FM-2001] cannot read directory {path}: {source}")]
    DirectoryRead {
        /// Directory being listed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Metadata of one directory entry could not be read.
    #[error("[FM-2002] cannot read metadata of {name:?} in {dir}: {source}")]
    EntryMetadata {
        /// Directory holding the entry.
        dir: PathBuf,
        /// Display name of the entry.
        name: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An expired file could not be removed.
    #[error("[FM-2003] cannot delete {path}: {source}")]
    Delete {
        /// File that was not removed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Output could not be encoded.
    #[error("[FM-2101] serialization failure in {context}: {details}")]
    Serialization {
        /// Serializer or output being written.
        context: &'static str,
        /// Serializer message.
        details: String,
    },

    /// File I/O outside the retention pass (config, logs).
    #[error("[FM-3002] IO failure at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Thread, channel or other process-level failure.
    #[error("[FM-3900] runtime failure: {details}")]
    Runtime {
        /// What failed.
        details: String,
    },
}

impl FmError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "FM-1001",
            Self::MissingConfig { .. } => "FM-1002",
            Self::ConfigParse { .. } => "FM-1003",
            Self::InvalidCron { .. } => "FM-1004",
            Self::DirectoryRead { .. } => "FM-2001",
            Self::EntryMetadata { .. } => "FM-2002",
            Self::Delete { .. } => "FM-2003",
            Self::Serialization { .. } => "FM-2101",
            Self::Io { .. } => "FM-3002",
            Self::Runtime { .. } => "FM-3900",
        }
    }

    /// Whether a later tick might succeed where this one failed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DirectoryRead { .. }
                | Self::EntryMetadata { .. }
                | Self::Delete { .. }
                | Self::Io { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Directory listing failure for a watched path.
    #[must_use]
    pub fn directory_read(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::DirectoryRead {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Deletion failure for a single file.
    #[must_use]
    pub fn delete(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Delete {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for FmError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for FmError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
