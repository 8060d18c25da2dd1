//! Configuration: cron expression plus watched directories, from a JSON/TOML
//! file or from environment variables.

use std::collections::{BTreeSet, HashSet};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{FmError, Result};

/// File consulted when neither `--config` nor `CONFIG_PATH` names one.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Environment variable naming the config file.
pub const ENV_CONFIG_PATH: &str = "CONFIG_PATH";
/// Cron expression for the environment surface.
pub const ENV_CRON: &str = "FILEMAN_CRON";
/// Comma-separated watched paths; setting it selects the environment surface.
pub const ENV_PATHS: &str = "FILEMAN_PATHS";
/// Comma-separated thresholds in days, parallel to [`ENV_PATHS`].
pub const ENV_AGES: &str = "FILEMAN_AGES";
/// `skip` or `queue`.
pub const ENV_OVERLAP: &str = "FILEMAN_OVERLAP";
/// Activity log path for the environment surface.
pub const ENV_JSONL_LOG: &str = "FILEMAN_JSONL_LOG";

/// Full fileman configuration model.
///
/// Field names follow the `{"Cron": ..., "WatchedDirectories": [...]}` layout;
/// snake_case spellings are accepted on input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Shared schedule for every watched directory, five to seven fields.
    #[serde(rename = "Cron", alias = "cron", default)]
    pub cron: String,
    /// What to do with a tick that fires while the previous pass still runs.
    #[serde(default)]
    pub overlap: OverlapPolicy,
    /// Activity log location; `None` means the working-directory default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonl_log: Option<PathBuf>,
    /// One retention rule per directory.
    #[serde(
        rename = "WatchedDirectories",
        alias = "watched_directories",
        default
    )]
    pub watched_directories: Vec<WatchedDirectory>,
    /// Where this config came from. Not part of the document.
    #[serde(skip)]
    pub source: ConfigSource,
}

/// One retention rule: files in `path` older than `age` days are removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchedDirectory {
    /// Directory whose immediate children are aged.
    #[serde(rename = "Path", alias = "path")]
    pub path: PathBuf,
    /// Threshold in fractional days; only strictly older files are removed.
    #[serde(rename = "Age", alias = "age")]
    pub age: f64,
}

/// Overlap handling for a job whose previous pass has not finished.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// Drop the tick.
    #[default]
    Skip,
    /// Buffer at most one tick behind the running pass.
    Queue,
}

impl OverlapPolicy {
    /// Channel capacity between the scheduler and a job's worker.
    #[must_use]
    pub const fn channel_capacity(self) -> usize {
        match self {
            Self::Skip => 0,
            Self::Queue => 1,
        }
    }
}

impl FromStr for OverlapPolicy {
    type Err = FmError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "queue" => Ok(Self::Queue),
            other => Err(FmError::ConfigParse {
                context: "overlap",
                details: format!("expected \"skip\" or \"queue\", got {other:?}"),
            }),
        }
    }
}

impl fmt::Display for OverlapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Skip => "skip",
            Self::Queue => "queue",
        })
    }
}

/// Origin of a loaded configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built in code.
    #[default]
    Inline,
    /// Read from this file.
    File(PathBuf),
    /// Read from `FILEMAN_*` variables.
    Environment,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => f.write_str("inline"),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Environment => write!(f, "environment ({ENV_PATHS})"),
        }
    }
}

impl Config {
    /// Load from `explicit`, the environment surface, `CONFIG_PATH`, or
    /// `config.json`, in that order of precedence.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit, env_var)
    }

    /// [`Config::load`] with an injectable environment lookup.
    pub fn load_with<F>(explicit: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match Self::resolve_source(explicit, &lookup) {
            ConfigSource::Environment => Self::from_env_lookup(&lookup)?,
            ConfigSource::File(path) => Self::from_file(&path)?,
            ConfigSource::Inline => {
                return Err(FmError::Runtime {
                    details: "config source resolved to nothing".to_string(),
                });
            }
        };

        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Which surface [`Config::load_with`] would read.
    pub fn resolve_source<F>(explicit: Option<&Path>, lookup: F) -> ConfigSource
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = explicit {
            return ConfigSource::File(path.to_path_buf());
        }
        if lookup(ENV_PATHS).is_some() {
            return ConfigSource::Environment;
        }
        let path = lookup(ENV_CONFIG_PATH).map_or_else(
            || PathBuf::from(DEFAULT_CONFIG_FILE),
            PathBuf::from,
        );
        ConfigSource::File(path)
    }

    /// Read and parse one config file. `.toml` files are TOML, everything else JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FmError::MissingConfig {
                path: path.to_path_buf(),
            });
        }
        let raw = fs::read_to_string(path).map_err(|source| FmError::io(path, source))?;
        let mut cfg = Self::parse_document(path, &raw)?;
        cfg.source = ConfigSource::File(path.to_path_buf());
        Ok(cfg)
    }

    fn parse_document(path: &Path, raw: &str) -> Result<Self> {
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Ok(toml::from_str(raw)?)
        } else {
            serde_json::from_str(raw).map_err(|error| FmError::ConfigParse {
                context: "json",
                details: format!("{}: {error}", path.display()),
            })
        }
    }

    /// Build a config from `FILEMAN_*` variables.
    ///
    /// `FILEMAN_PATHS` and `FILEMAN_AGES` are parallel comma-separated lists.
    pub fn from_env_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let paths_raw = lookup(ENV_PATHS).ok_or_else(|| FmError::InvalidConfig {
            details: format!("{ENV_PATHS} is not set"),
        })?;
        let cron = lookup(ENV_CRON).ok_or_else(|| FmError::InvalidConfig {
            details: format!("{ENV_CRON} must be set when {ENV_PATHS} is used"),
        })?;
        let ages_raw = lookup(ENV_AGES).unwrap_or_default();

        let paths = split_list(ENV_PATHS, &paths_raw)?;
        let ages = split_list(ENV_AGES, &ages_raw)?;
        if paths.len() != ages.len() {
            return Err(FmError::InvalidConfig {
                details: format!(
                    "{ENV_PATHS} has {} entries but {ENV_AGES} has {}",
                    paths.len(),
                    ages.len()
                ),
            });
        }

        let mut watched_directories = Vec::with_capacity(paths.len());
        for (path, age_raw) in paths.into_iter().zip(ages) {
            let age = age_raw
                .parse::<f64>()
                .map_err(|error| FmError::ConfigParse {
                    context: "env",
                    details: format!("{ENV_AGES} entry {age_raw:?}: {error}"),
                })?;
            watched_directories.push(WatchedDirectory {
                path: PathBuf::from(path),
                age,
            });
        }

        let overlap = match lookup(ENV_OVERLAP) {
            Some(raw) => raw.parse()?,
            None => OverlapPolicy::default(),
        };

        Ok(Self {
            cron,
            overlap,
            jsonl_log: lookup(ENV_JSONL_LOG).map(PathBuf::from),
            watched_directories,
            source: ConfigSource::Environment,
        })
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Render as TOML for `fileman config show`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|error| FmError::Serialization {
            context: "toml",
            details: error.to_string(),
        })
    }

    /// Strip trailing slashes (root kept) and surrounding whitespace.
    fn normalize(&mut self) {
        self.cron = self.cron.trim().to_string();
        for dir in &mut self.watched_directories {
            let s = dir.path.to_string_lossy();
            let trimmed = s.trim_end_matches('/');
            if trimmed.len() != s.len() {
                dir.path = if trimmed.is_empty() {
                    PathBuf::from("/")
                } else {
                    PathBuf::from(trimmed)
                };
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.cron.is_empty() {
            return Err(FmError::InvalidConfig {
                details: "cron expression must not be empty".to_string(),
            });
        }
        parse_schedule(&self.cron)?;

        if self.watched_directories.is_empty() {
            return Err(FmError::InvalidConfig {
                details: "at least one watched directory is required".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for (idx, dir) in self.watched_directories.iter().enumerate() {
            if dir.path.as_os_str().is_empty() {
                return Err(FmError::InvalidConfig {
                    details: format!("watched directory #{idx} has an empty path"),
                });
            }
            if !dir.age.is_finite() || dir.age < 0.0 {
                return Err(FmError::InvalidConfig {
                    details: format!(
                        "age for {} must be a finite number >= 0, got {}",
                        dir.path.display(),
                        dir.age
                    ),
                });
            }
            if !seen.insert(dir.path.as_path()) {
                return Err(FmError::InvalidConfig {
                    details: format!("{} is watched more than once", dir.path.display()),
                });
            }
        }

        Ok(())
    }
}

// ──────────────────── cron expressions ────────────────────

/// Bring a cron expression into the six/seven-field form the `cron` crate reads.
///
/// Five-field expressions (`min hour dom mon dow`) gain a leading `0` seconds
/// field and have numeric day-of-week values shifted from `0-7` (Sunday 0 or 7)
/// to `1-7` (Sunday 1). `@` shorthands and six/seven-field forms pass through.
pub fn normalize_cron(expression: &str) -> Result<String> {
    let trimmed = expression.trim();
    if trimmed.starts_with('@') {
        return Ok(trimmed.to_string());
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    match fields.len() {
        5 => {
            let dow = shift_day_of_week(fields[4]).map_err(|details| FmError::InvalidCron {
                expression: expression.to_string(),
                details,
            })?;
            Ok(format!(
                "0 {} {} {} {} {dow}",
                fields[0], fields[1], fields[2], fields[3]
            ))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(FmError::InvalidCron {
            expression: expression.to_string(),
            details: format!("expected 5, 6 or 7 fields, found {n}"),
        }),
    }
}

/// Parse a cron expression (any accepted form) into a schedule.
pub fn parse_schedule(expression: &str) -> Result<cron::Schedule> {
    let normalized = normalize_cron(expression)?;
    cron::Schedule::from_str(&normalized).map_err(|error| FmError::InvalidCron {
        expression: expression.to_string(),
        details: error.to_string(),
    })
}

fn shift_day_of_week(field: &str) -> std::result::Result<String, String> {
    let mut out = Vec::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };

        if range == "*" || range == "?" || !range.starts_with(|c: char| c.is_ascii_digit()) {
            out.push(part.to_string());
            continue;
        }

        if let Some(step) = step {
            // Expand stepped values so Sunday (0 or 7) maps to 1 wherever it lands.
            let (lo, hi) = match range.split_once('-') {
                Some((lo, hi)) => (parse_dow(lo)?, parse_dow(hi)?),
                None => (parse_dow(range)?, 7),
            };
            let step = match step.parse::<usize>() {
                Ok(step) if step > 0 => step,
                _ => return Err(format!("day-of-week step {step:?} is not a positive number")),
            };
            let days: BTreeSet<u8> = (lo..=hi)
                .step_by(step)
                .map(|day| if day == 7 { 1 } else { day + 1 })
                .collect();
            if days.is_empty() {
                return Err(format!("day-of-week range {range:?} is empty"));
            }
            out.extend(days.iter().map(u8::to_string));
            continue;
        }

        match range.split_once('-') {
            Some((lo, hi)) => {
                let lo = parse_dow(lo)?;
                let hi = parse_dow(hi)?;
                if hi == 7 {
                    // `a-7` ends on Sunday, which is day 1 in the shifted numbering.
                    if lo < 7 {
                        out.push(format!("{}-7", lo + 1));
                    }
                    out.push("1".to_string());
                } else {
                    out.push(format!("{}-{}", lo + 1, hi + 1));
                }
            }
            None => {
                let day = parse_dow(range)?;
                let shifted = if day == 7 { 1 } else { day + 1 };
                out.push(shifted.to_string());
            }
        }
    }
    Ok(out.join(","))
}

fn parse_dow(raw: &str) -> std::result::Result<u8, String> {
    match raw.parse::<u8>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(format!("day-of-week value {raw:?} is out of range 0-7")),
    }
}

// ──────────────────── env helpers ────────────────────

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

/// Comma-separated items, trimmed. An empty item would shift the pairing of
/// parallel lists, so it is rejected rather than skipped.
fn split_list(var: &str, raw: &str) -> Result<Vec<String>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    raw.split(',')
        .map(str::trim)
        .enumerate()
        .map(|(index, item)| {
            if item.is_empty() {
                Err(FmError::InvalidConfig {
                    details: format!("{var} item {} is empty", index + 1),
                })
            } else {
                Ok(item.to_string())
            }
        })
        .collect()
}
