//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use thiserror::Error;

use fileman::core::clock::SystemClock;
use fileman::core::config::Config;
use fileman::core::errors::FmError;
use fileman::daemon::loop_main::{Daemon, DaemonArgs as LoopArgs};
use fileman::daemon::scheduler::JobRegistry;
use fileman::logger::activity::{ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger};
use fileman::logger::jsonl::JsonlConfig;
use fileman::platform::fs::LocalFileSystem;
use fileman::scanner::listing::FileRecord;
use fileman::scanner::retention::{RetentionEnforcer, RetentionReport};

/// fileman: scheduled age-based cleanup of watched directories.
#[derive(Debug, Parser)]
#[command(
    name = "fileman",
    author,
    version,
    about = "Delete files older than a per-directory age on a cron schedule",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Config file (defaults to $CONFIG_PATH, then ./config.json).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the scheduler until SIGTERM/SIGINT.
    Daemon(DaemonArgs),
    /// Run one retention pass over every watched directory now.
    Sweep(SweepArgs),
    /// Show the age-annotated entries of one directory without deleting anything.
    List(ListArgs),
    /// Show scheduled jobs and their upcoming fire times.
    Jobs(JobsArgs),
    /// Inspect and validate configuration.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct DaemonArgs {
    /// Systemd watchdog timeout in seconds (0 disables).
    #[arg(long, default_value_t = 0, value_name = "SECONDS")]
    watchdog_sec: u64,
    /// Sweep every directory once at startup.
    #[arg(long)]
    sweep_on_start: bool,
    /// Activity log file (overrides `jsonl_log` in the config).
    #[arg(long, value_name = "PATH")]
    jsonl_log: Option<PathBuf>,
    /// Do not echo activity to stderr.
    #[arg(long)]
    no_echo: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct SweepArgs {
    /// Sweep this directory instead of the configured ones.
    #[arg(long, value_name = "DIR", requires = "age")]
    dir: Option<PathBuf>,
    /// Age threshold in days for --dir.
    #[arg(long, value_name = "DAYS", requires = "dir")]
    age: Option<f64>,
    /// Also append activity events to this JSONL file.
    #[arg(long, value_name = "PATH")]
    jsonl_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ListArgs {
    /// Directory to list.
    path: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct JobsArgs {
    /// Upcoming fire times to show per job.
    #[arg(long, default_value_t = 3, value_name = "N")]
    count: usize,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ConfigCommand {
    /// Print where configuration would be read from.
    Path,
    /// Print the effective configuration.
    Show,
    /// Load and validate the configuration.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<FmError> for CliError {
    fn from(error: FmError) -> Self {
        match error {
            FmError::InvalidConfig { .. }
            | FmError::MissingConfig { .. }
            | FmError::ConfigParse { .. }
            | FmError::InvalidCron { .. } => Self::User(error.to_string()),
            FmError::Serialization { .. } => Self::Internal(error.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::Daemon(args) => run_daemon(cli, args),
        Command::Sweep(args) => run_sweep(cli, args),
        Command::List(args) => run_list(cli, args),
        Command::Jobs(args) => run_jobs(cli, args),
        Command::Config(args) => run_config(cli, args),
    }
}

// ──────────────────── daemon ────────────────────

fn run_daemon(cli: &Cli, args: &DaemonArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let loop_args = LoopArgs {
        config_path: cli.config.clone(),
        watchdog_sec: args.watchdog_sec,
        sweep_on_start: args.sweep_on_start,
        jsonl_log: args.jsonl_log.clone(),
        echo_stderr: !args.no_echo,
        ..LoopArgs::default()
    };

    let mut daemon = Daemon::init(config, &loop_args)?;
    daemon.run()?;
    Ok(())
}

// ──────────────────── sweep ────────────────────

fn run_sweep(cli: &Cli, args: &SweepArgs) -> Result<(), CliError> {
    let targets: Vec<(PathBuf, f64)> = match (&args.dir, args.age) {
        (Some(dir), Some(age)) => {
            if !age.is_finite() || age < 0.0 {
                return Err(CliError::User(format!(
                    "--age must be a finite number >= 0, got {age}"
                )));
            }
            vec![(dir.clone(), age)]
        }
        _ => Config::load(cli.config.as_deref())?
            .watched_directories
            .into_iter()
            .map(|w| (w.path, w.age))
            .collect(),
    };

    let logger = match &args.jsonl_log {
        Some(path) => Some(spawn_logger(ActivityLoggerConfig {
            jsonl_config: JsonlConfig {
                path: path.clone(),
                ..JsonlConfig::default()
            },
            echo_stderr: false,
            ..ActivityLoggerConfig::default()
        })?),
        None => None,
    };

    let mut enforcer = RetentionEnforcer::new(Arc::new(LocalFileSystem), Arc::new(SystemClock));
    if let Some((handle, _)) = &logger {
        enforcer = enforcer.with_logger(handle.clone());
    }

    let reports: Vec<RetentionReport> = targets
        .iter()
        .map(|(dir, age)| enforcer.delete_old_files(dir, *age))
        .collect();

    if let Some((handle, join)) = logger {
        stop_logger(&handle, join);
    }

    match output_mode(cli) {
        OutputMode::Human => {
            for report in &reports {
                print_report(report);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "sweep",
                "directories": reports.iter().map(report_json).collect::<Vec<_>>(),
            });
            write_json_line(&payload)?;
        }
    }

    let failures: usize = reports.iter().map(|r| r.failures.len()).sum();
    if failures > 0 {
        return Err(CliError::Partial(format!(
            "sweep finished with {failures} failure(s)"
        )));
    }
    Ok(())
}

fn stop_logger(handle: &ActivityLoggerHandle, join: thread::JoinHandle<()>) {
    handle.shutdown();
    if join.join().is_err() {
        eprintln!("[FM-LOG] logger thread panicked");
    }
}

fn print_report(report: &RetentionReport) {
    let dir = report.directory.display();
    for path in &report.deleted {
        println!("Deleted file {}", path.display());
    }
    for failure in &report.failures {
        println!("Error: {failure}");
    }
    if report.is_noop() {
        println!("No files to delete in path {dir}");
    } else {
        println!(
            "{dir}: {} deleted, {} failed, {} scanned (threshold {} days)",
            report.deleted.len(),
            report.failures.len(),
            report.records_scanned,
            report.threshold_days
        );
    }
}

fn report_json(report: &RetentionReport) -> Value {
    json!({
        "directory": report.directory.to_string_lossy(),
        "threshold_days": report.threshold_days,
        "records_scanned": report.records_scanned,
        "deleted": report
            .deleted
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect::<Vec<_>>(),
        "failures": report
            .failures
            .iter()
            .map(|f| json!({"code": f.code(), "message": f.to_string()}))
            .collect::<Vec<_>>(),
        "duration_ms": u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
    })
}

// ──────────────────── list ────────────────────

fn run_list(cli: &Cli, args: &ListArgs) -> Result<(), CliError> {
    let enforcer = RetentionEnforcer::new(Arc::new(LocalFileSystem), Arc::new(SystemClock));
    let records = enforcer.scanner().list_files(&args.path)?;

    match output_mode(cli) {
        OutputMode::Human => {
            if records.is_empty() {
                println!("{} is empty", args.path.display());
            }
            for record in &records {
                println!("{}", record_line(record));
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "list",
                "directory": args.path.to_string_lossy(),
                "entries": records.iter().map(record_json).collect::<Vec<_>>(),
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn record_line(record: &FileRecord) -> String {
    match &record.failure {
        Some(failure) => format!("{:<40} error: {failure}", record.name),
        None => format!(
            "{:<40} {:<4} {:>10.2}d  {}",
            record.name,
            if record.is_dir { "dir" } else { "file" },
            record.age,
            epoch_label(record.created_at)
        ),
    }
}

fn record_json(record: &FileRecord) -> Value {
    match &record.failure {
        Some(failure) => json!({
            "name": record.name,
            "error_code": failure.code(),
            "error": failure.to_string(),
        }),
        None => json!({
            "name": record.name,
            "path": record.path.to_string_lossy(),
            "modified": record.created_at,
            "age_days": record.age,
            "is_dir": record.is_dir,
        }),
    }
}

fn epoch_label(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map_or_else(|| secs.to_string(), |t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

// ──────────────────── jobs ────────────────────

fn run_jobs(cli: &Cli, args: &JobsArgs) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;
    let now = Utc::now();
    let registry = JobRegistry::from_config(&config, now)?;

    match output_mode(cli) {
        OutputMode::Human => {
            for job in registry.jobs() {
                println!(
                    "{} (id {}): every {:?}, files older than {} days",
                    job.name, job.id, job.cron, job.age_threshold
                );
                for at in job.upcoming(now, args.count) {
                    println!("  {}", at.to_rfc3339_opts(SecondsFormat::Secs, true));
                }
            }
        }
        OutputMode::Json => {
            let jobs: Vec<Value> = registry
                .jobs()
                .iter()
                .map(|job| {
                    json!({
                        "id": job.id,
                        "name": job.name,
                        "directory": job.directory.to_string_lossy(),
                        "age_days": job.age_threshold,
                        "cron": job.cron,
                        "upcoming": job
                            .upcoming(now, args.count)
                            .iter()
                            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                            .collect::<Vec<_>>(),
                    })
                })
                .collect();
            write_json_line(&json!({"command": "jobs", "jobs": jobs}))?;
        }
    }
    Ok(())
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match args.command {
        None | Some(ConfigCommand::Path) => {
            let source = Config::resolve_source(cli.config.as_deref(), env_lookup);
            let file = match &source {
                fileman::core::config::ConfigSource::File(path) => Some(path.clone()),
                _ => None,
            };
            let exists = file.as_deref().is_none_or(Path::exists);

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{source}");
                    if !exists {
                        println!("  (file does not exist)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "source": source.to_string(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;
            match output_mode(cli) {
                OutputMode::Human => println!("{}", config.to_toml()?),
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "source": config.source.to_string(),
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;
                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.source);
                        println!("  Directories: {}", config.watched_directories.len());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "source": config.source.to_string(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error_code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("FILEMAN_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
