//! Activity logger: a dedicated thread owning the JSONL writer.
//!
//! Every other thread holds a cloneable [`ActivityLoggerHandle`] and sends
//! [`ActivityEvent`]s over a bounded crossbeam channel. `send` never blocks:
//! when the channel is full the event is dropped and counted, and the logger
//! thread reports the drop count in-band.
//!
//! With `echo_stderr` enabled each event is also printed as one
//! human-readable line, which is what an operator watching the daemon sees.

#![allow(missing_docs)]

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{FmError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Default bounded channel capacity for log events.
const CHANNEL_CAPACITY: usize = 1024;
/// How often a degraded writer retries its primary path.
const RECOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// Events emitted by the scheduler and the retention engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
        jobs: usize,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    JobScheduled {
        name: String,
        id: u64,
        cron: String,
        next_fire: String,
    },
    JobSkipped {
        name: String,
        reason: String,
    },
    FileDeleted {
        directory: String,
        path: String,
        age_days: f64,
    },
    PassFailure {
        directory: String,
        code: String,
        message: String,
    },
    PassCompleted {
        directory: String,
        records_scanned: usize,
        deleted: usize,
        failures: usize,
        duration_ms: u64,
    },
    ConfigReloaded {
        details: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

/// Cloneable, `Send` handle used to submit events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Submit an event without blocking.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events dropped since the logger thread last reported them.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and stop. Blocks until the sentinel is queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Options for the logger thread.
#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
    /// Also print each event as a human-readable stderr line.
    pub echo_stderr: bool,
}

impl Default for ActivityLoggerConfig {
    fn default() -> Self {
        Self {
            jsonl_config: JsonlConfig::default(),
            channel_capacity: CHANNEL_CAPACITY,
            echo_stderr: true,
        }
    }
}

/// Spawn the logger thread.
///
/// The thread runs until `shutdown()` is called or every handle is dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("fileman-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config, &dropped))
        .map_err(|e| FmError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(
    rx: &Receiver<ActivityEvent>,
    config: ActivityLoggerConfig,
    dropped: &AtomicU64,
) {
    let mut jsonl = JsonlWriter::open(config.jsonl_config);
    let mut last_recovery = Instant::now();

    while let Ok(event) = rx.recv() {
        if jsonl.state() != "normal" && last_recovery.elapsed() >= RECOVERY_INTERVAL {
            jsonl.try_recover();
            last_recovery = Instant::now();
        }

        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if event == ActivityEvent::Shutdown {
            break;
        }

        if config.echo_stderr
            && let Some(line) = human_line(&event)
        {
            let _ = writeln!(io::stderr(), "{line}");
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.flush();
    jsonl.fsync();
}

// ──────────────────── event conversion ────────────────────

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
            jobs,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.details = Some(format!(
                "version={version} config_hash={config_hash} jobs={jobs}"
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::JobScheduled {
            name,
            id,
            cron,
            next_fire,
        } => {
            let mut e = LogEntry::new(EventType::JobScheduled, Severity::Info);
            e.job = Some(name.clone());
            e.details = Some(format!("id={id} cron={cron:?} next={next_fire}"));
            e
        }
        ActivityEvent::JobSkipped { name, reason } => {
            let mut e = LogEntry::new(EventType::JobSkipped, Severity::Warning);
            e.job = Some(name.clone());
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::FileDeleted {
            directory,
            path,
            age_days,
        } => {
            let mut e = LogEntry::new(EventType::FileDelete, Severity::Info);
            e.directory = Some(directory.clone());
            e.path = Some(path.clone());
            e.age_days = Some(*age_days);
            e.ok = Some(true);
            e
        }
        ActivityEvent::PassFailure {
            directory,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::PassFailure, Severity::Warning);
            e.directory = Some(directory.clone());
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::PassCompleted {
            directory,
            records_scanned,
            deleted,
            failures,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::PassComplete, Severity::Info);
            e.directory = Some(directory.clone());
            e.records_scanned = Some(*records_scanned);
            e.deleted = Some(*deleted);
            e.failures = Some(*failures);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(*failures == 0);
            e
        }
        ActivityEvent::ConfigReloaded { details } => {
            let mut e = LogEntry::new(EventType::ConfigReload, Severity::Info);
            e.details = Some(details.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::DaemonStop, Severity::Info),
    }
}

/// Operator-facing rendering of an event; `None` for events with no console form.
fn human_line(event: &ActivityEvent) -> Option<String> {
    let line = match event {
        ActivityEvent::DaemonStarted { version, jobs, .. } => {
            format!("[FM-DAEMON] fileman {version} started with {jobs} job(s)")
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => format!("[FM-DAEMON] stopped ({reason}) after {uptime_secs}s"),
        ActivityEvent::JobScheduled {
            name,
            id,
            next_fire,
            ..
        } => format!("[FM-SCHED] scheduled job {name} id={id} next={next_fire}"),
        ActivityEvent::JobSkipped { name, reason } => {
            format!("[FM-SCHED] skipped tick for {name}: {reason}")
        }
        ActivityEvent::FileDeleted { path, age_days, .. } => {
            format!("[FM-SWEEP] deleted file {path} (age {age_days:.2}d)")
        }
        ActivityEvent::PassFailure {
            directory, message, ..
        } => format!("[FM-SWEEP] error in {directory}: {message}"),
        ActivityEvent::PassCompleted {
            directory,
            deleted: 0,
            failures: 0,
            ..
        } => format!("[FM-SWEEP] no files to delete in {directory}"),
        ActivityEvent::PassCompleted {
            directory,
            deleted,
            failures,
            duration_ms,
            ..
        } => format!(
            "[FM-SWEEP] {directory}: deleted={deleted} failures={failures} in {duration_ms}ms"
        ),
        ActivityEvent::ConfigReloaded { details } => format!("[FM-CONFIG] reloaded: {details}"),
        ActivityEvent::Error { code, message } => format!("[{code}] {message}"),
        ActivityEvent::Shutdown => return None,
    };
    Some(line)
}
