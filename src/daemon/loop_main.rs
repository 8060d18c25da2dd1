//! Daemon main loop.
//!
//! Threads:
//! - **Main thread**: polls signal flags, asks the [`JobRegistry`] which jobs
//!   are due and dispatches them, beats the watchdog.
//! - **One worker per job**: runs retention passes (see [`WorkerPool`]).
//! - **Logger thread**: writes activity events as JSONL (see `logger::activity`).
//!
//! SIGHUP rebuilds the registry from a freshly loaded config; a config that
//! fails to load leaves the running jobs untouched. SIGUSR1 sweeps every
//! directory right away.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::core::clock::SystemClock;
use crate::core::config::Config;
use crate::core::errors::{FmError, Result};
use crate::daemon::scheduler::{Dispatch, Job, JobRegistry, WorkerPool};
use crate::daemon::signals::{SignalFlags, WatchdogHeartbeat};
use crate::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use crate::logger::jsonl::JsonlConfig;
use crate::platform::fs::LocalFileSystem;
use crate::scanner::retention::RetentionEnforcer;

/// Longest the main loop sleeps before re-checking signals.
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// How long an on-demand sweep waits for a busy worker.
const SWEEP_WAIT: Duration = Duration::from_secs(2);

/// Arguments for `fileman daemon`.
#[derive(Debug, Clone)]
pub struct DaemonArgs {
    /// Config file; `None` resolves through `CONFIG_PATH` and the defaults.
    pub config_path: Option<PathBuf>,
    /// Systemd watchdog timeout in seconds (0 = disabled).
    pub watchdog_sec: u64,
    /// Sweep every directory once before waiting for the first tick.
    pub sweep_on_start: bool,
    /// Activity log override; wins over the config's `jsonl_log`.
    pub jsonl_log: Option<PathBuf>,
    /// Echo activity to stderr as human-readable lines.
    pub echo_stderr: bool,
    pub poll_interval: Duration,
}

impl Default for DaemonArgs {
    fn default() -> Self {
        Self {
            config_path: None,
            watchdog_sec: 0,
            sweep_on_start: false,
            jsonl_log: None,
            echo_stderr: true,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// The scheduling daemon.
pub struct Daemon {
    config: Config,
    config_path: Option<PathBuf>,
    registry: JobRegistry,
    pool: WorkerPool,
    logger_handle: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    signals: SignalFlags,
    watchdog: WatchdogHeartbeat,
    poll_interval: Duration,
    sweep_on_start: bool,
    start_time: Instant,
}

impl Daemon {
    /// Build the daemon with OS signal handlers installed.
    pub fn init(config: Config, args: &DaemonArgs) -> Result<Self> {
        Self::with_signals(config, args, SignalFlags::install())
    }

    /// Build the daemon around caller-owned signal flags.
    pub fn with_signals(config: Config, args: &DaemonArgs, signals: SignalFlags) -> Result<Self> {
        let jsonl_path = args
            .jsonl_log
            .clone()
            .or_else(|| config.jsonl_log.clone())
            .unwrap_or_else(|| JsonlConfig::default().path);
        let (logger_handle, logger_join) = spawn_logger(ActivityLoggerConfig {
            jsonl_config: JsonlConfig {
                path: jsonl_path,
                ..JsonlConfig::default()
            },
            echo_stderr: args.echo_stderr,
            ..ActivityLoggerConfig::default()
        })?;

        let enforcer = RetentionEnforcer::new(Arc::new(LocalFileSystem), Arc::new(SystemClock))
            .with_logger(logger_handle.clone());
        let registry = JobRegistry::from_config(&config, Utc::now())?;
        let mut pool = WorkerPool::new(config.overlap, enforcer, Some(logger_handle.clone()));
        pool.sync(&registry)?;

        let watchdog = if args.watchdog_sec > 0 {
            WatchdogHeartbeat::new(args.watchdog_sec)
        } else {
            WatchdogHeartbeat::disabled()
        };

        Ok(Self {
            config,
            config_path: args.config_path.clone(),
            registry,
            pool,
            logger_handle,
            logger_join: Some(logger_join),
            signals,
            watchdog,
            poll_interval: args.poll_interval.max(Duration::from_millis(1)),
            sweep_on_start: args.sweep_on_start,
            start_time: Instant::now(),
        })
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Run until a shutdown is requested.
    pub fn run(&mut self) -> Result<()> {
        let config_hash = self.config.stable_hash().unwrap_or_default();
        self.logger_handle.send(ActivityEvent::DaemonStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash,
            jobs: self.registry.len(),
        });
        self.announce_jobs();

        if self.sweep_on_start {
            self.sweep_all();
        }

        loop {
            if self.signals.should_shutdown() {
                break;
            }
            if self.signals.take_reload() {
                self.handle_config_reload();
            }
            if self.signals.take_sweep() {
                self.sweep_all();
            }

            let now = Utc::now();
            self.dispatch_due(now);

            let status = format!("{} job(s), next {}", self.registry.len(), self.next_label());
            self.watchdog.maybe_notify(&status);

            thread::sleep(self.sleep_budget(Utc::now()));
        }

        self.shutdown("shutdown requested");
        Ok(())
    }

    /// Dispatch every job due at `now`. Returns how many ticks were accepted.
    pub fn dispatch_due(&mut self, now: DateTime<Utc>) -> usize {
        let due: Vec<Job> = self.registry.due(now).into_iter().cloned().collect();
        let mut accepted = 0;
        for job in &due {
            match self.pool.dispatch(job) {
                Ok(Dispatch::Accepted) => accepted += 1,
                Ok(Dispatch::Skipped) => {}
                Err(e) => self.report_error(&e),
            }
        }
        accepted
    }

    /// Sweep every directory now, waiting briefly for busy workers.
    pub fn sweep_all(&mut self) {
        for job in self.registry.jobs() {
            if let Err(e) = self.pool.dispatch_within(job, SWEEP_WAIT) {
                self.report_error(&e);
            }
        }
    }

    fn handle_config_reload(&mut self) {
        match Config::load(self.config_path.as_deref()) {
            Ok(new_config) => self.apply_config(new_config),
            Err(e) => {
                self.logger_handle.send(ActivityEvent::Error {
                    code: e.code().to_string(),
                    message: format!("config reload failed, keeping current jobs: {e}"),
                });
            }
        }
    }

    /// Replace the running jobs with the ones `new_config` describes.
    pub fn apply_config(&mut self, new_config: Config) {
        let old_hash = self.config.stable_hash().unwrap_or_default();
        let new_hash = new_config.stable_hash().unwrap_or_default();
        if old_hash == new_hash {
            self.logger_handle.send(ActivityEvent::ConfigReloaded {
                details: "config unchanged".to_string(),
            });
            return;
        }

        if let Err(e) = self.registry.replace_from_config(&new_config, Utc::now()) {
            self.report_error(&e);
            return;
        }
        self.pool.set_policy(new_config.overlap);
        if let Err(e) = self.pool.sync(&self.registry) {
            self.report_error(&e);
        }

        let mut details = format!("config hash: {old_hash} -> {new_hash}");
        if new_config.jsonl_log != self.config.jsonl_log {
            details.push_str(" (jsonl_log takes effect on restart)");
        }
        self.logger_handle
            .send(ActivityEvent::ConfigReloaded { details });
        self.config = new_config;
        self.announce_jobs();
    }

    fn announce_jobs(&self) {
        for job in self.registry.jobs() {
            self.logger_handle.send(ActivityEvent::JobScheduled {
                name: job.name.clone(),
                id: job.id,
                cron: job.cron.clone(),
                next_fire: fire_label(job.next_fire()),
            });
        }
    }

    fn report_error(&self, error: &FmError) {
        self.logger_handle.send(ActivityEvent::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        });
    }

    fn next_label(&self) -> String {
        fire_label(self.registry.next_wakeup())
    }

    fn sleep_budget(&self, now: DateTime<Utc>) -> Duration {
        self.registry
            .next_wakeup()
            .map_or(self.poll_interval, |at| {
                (at - now).to_std().unwrap_or(Duration::ZERO)
            })
            .min(self.poll_interval)
    }

    fn shutdown(&mut self, reason: &str) {
        let uptime_secs = self.start_time.elapsed().as_secs();

        // Workers finish their current pass before the logger goes away.
        self.pool.shutdown();

        self.logger_handle.send(ActivityEvent::DaemonStopped {
            reason: reason.to_string(),
            uptime_secs,
        });
        self.logger_handle.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
    }
}

fn fire_label(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(
        || "never".to_string(),
        |t| t.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}
