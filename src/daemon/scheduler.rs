//! Job registry and per-job workers.
//!
//! The registry is a plain value owned by whoever starts the daemon: one
//! [`Job`] per watched directory, each with its own cron schedule. The main
//! loop asks [`JobRegistry::due`] which jobs fired and hands them to the
//! [`WorkerPool`], where every job has a dedicated thread fed by a crossbeam
//! channel sized by the [`OverlapPolicy`]:
//!
//! - `skip`: rendezvous channel. A tick is accepted only while the worker is
//!   idle and waiting; otherwise it is dropped and logged.
//! - `queue`: one slot. A single tick may wait behind the running pass.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError, bounded};
use parking_lot::Mutex;

use crate::core::config::{Config, OverlapPolicy, parse_schedule};
use crate::core::errors::{FmError, Result};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::scanner::retention::RetentionEnforcer;

/// Prefix of every job name; the watched path follows it.
pub const JOB_NAME_PREFIX: &str = "PathCleaner-";

// ──────────────────── jobs ────────────────────

/// A recurring retention pass over one directory.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u64,
    pub name: String,
    pub directory: PathBuf,
    pub age_threshold: f64,
    pub cron: String,
    schedule: cron::Schedule,
    next_fire: Option<DateTime<Utc>>,
}

impl Job {
    /// Job name for a watched directory.
    pub fn name_for(directory: &Path) -> String {
        format!("{JOB_NAME_PREFIX}{}", directory.display())
    }

    /// Next time this job fires, or `None` once the schedule is exhausted.
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.next_fire
    }

    /// The next `count` fire times strictly after `after`.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&after).take(count).collect()
    }

    fn tick(&self) -> Tick {
        Tick {
            job_id: self.id,
            job_name: self.name.clone(),
            directory: self.directory.clone(),
            age_threshold: self.age_threshold,
        }
    }
}

/// All scheduled jobs. Ids are handed out in registration order and never reused.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: Vec<Job>,
    next_id: u64,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            next_id: 1,
        }
    }

    /// One job per watched directory, all sharing the config's cron expression.
    pub fn from_config(config: &Config, now: DateTime<Utc>) -> Result<Self> {
        let mut registry = Self::new();
        registry.replace_from_config(config, now)?;
        Ok(registry)
    }

    /// Swap every job for the ones described by `config`.
    ///
    /// A job whose directory, threshold and cron are all unchanged keeps its id
    /// and next fire time. New or changed entries get fresh ids. Nothing
    /// changes if any job fails to build.
    pub fn replace_from_config(&mut self, config: &Config, now: DateTime<Utc>) -> Result<()> {
        let schedule = parse_schedule(&config.cron)?;
        let mut next_id = self.next_id;
        let mut jobs = Vec::with_capacity(config.watched_directories.len());

        for watched in &config.watched_directories {
            let unchanged = self.jobs.iter().find(|job| {
                job.directory == watched.path
                    && job.age_threshold.to_bits() == watched.age.to_bits()
                    && job.cron == config.cron
            });
            if let Some(job) = unchanged {
                jobs.push(job.clone());
                continue;
            }
            jobs.push(Job {
                id: next_id,
                name: Job::name_for(&watched.path),
                directory: watched.path.clone(),
                age_threshold: watched.age,
                cron: config.cron.clone(),
                next_fire: schedule.after(&now).next(),
                schedule: schedule.clone(),
            });
            next_id += 1;
        }

        self.jobs = jobs;
        self.next_id = next_id;
        Ok(())
    }

    /// Add a single job and return its id.
    pub fn register(
        &mut self,
        directory: PathBuf,
        age_threshold: f64,
        cron: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let schedule = parse_schedule(cron)?;
        let id = self.next_id;
        self.next_id += 1;
        self.jobs.push(Job {
            id,
            name: Job::name_for(&directory),
            directory,
            age_threshold,
            cron: cron.to_string(),
            next_fire: schedule.after(&now).next(),
            schedule,
        });
        Ok(id)
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn get(&self, id: u64) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs whose fire time is at or before `now`.
    ///
    /// Each returned job is advanced to its first occurrence strictly after
    /// `now`, so a run of missed ticks produces a single firing.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<&Job> {
        let mut fired = Vec::new();
        for (idx, job) in self.jobs.iter_mut().enumerate() {
            if job.next_fire.is_some_and(|at| at <= now) {
                job.next_fire = job.schedule.after(&now).next();
                fired.push(idx);
            }
        }
        fired.into_iter().map(|idx| &self.jobs[idx]).collect()
    }

    /// Earliest upcoming fire time across all jobs.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.jobs.iter().filter_map(Job::next_fire).min()
    }
}

// ──────────────────── workers ────────────────────

/// Work order for one enforcement pass.
#[derive(Debug, Clone)]
pub struct Tick {
    pub job_id: u64,
    pub job_name: String,
    pub directory: PathBuf,
    pub age_threshold: f64,
}

/// What happened to a tick handed to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Accepted,
    /// The job's worker was busy and the overlap policy dropped the tick.
    Skipped,
}

/// Running totals per job, updated by the workers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStats {
    pub passes: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub failures: u64,
    pub last_run: Option<DateTime<Utc>>,
}

type SharedStats = Arc<Mutex<HashMap<u64, JobStats>>>;

struct Worker {
    tx: Sender<Tick>,
    join: thread::JoinHandle<()>,
    directory: PathBuf,
    policy: OverlapPolicy,
}

/// One worker thread per job.
pub struct WorkerPool {
    policy: OverlapPolicy,
    enforcer: RetentionEnforcer,
    logger: Option<ActivityLoggerHandle>,
    workers: HashMap<u64, Worker>,
    retired: Vec<thread::JoinHandle<()>>,
    stats: SharedStats,
}

/// Scheduler-to-worker channel for `policy`.
pub(crate) fn tick_channel(policy: OverlapPolicy) -> (Sender<Tick>, Receiver<Tick>) {
    bounded(policy.channel_capacity())
}

impl WorkerPool {
    pub fn new(
        policy: OverlapPolicy,
        enforcer: RetentionEnforcer,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            policy,
            enforcer,
            logger,
            workers: HashMap::new(),
            retired: Vec::new(),
            stats: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }

    /// Policy for workers spawned from now on.
    pub fn set_policy(&mut self, policy: OverlapPolicy) {
        self.policy = policy;
    }

    /// Match workers to the registry's jobs.
    ///
    /// Workers of unchanged jobs keep running. When a job is replaced by one
    /// for the same directory, its worker moves to the new id, so a pass in
    /// flight still blocks overlapping ticks. Other workers whose job is gone,
    /// or whose channel no longer matches the policy, are retired: they finish
    /// the pass they are running, then exit. Finished retirees are joined here.
    pub fn sync(&mut self, registry: &JobRegistry) -> Result<()> {
        self.reap_retired();

        let stale: Vec<u64> = self
            .workers
            .iter()
            .filter(|(id, worker)| registry.get(**id).is_none() || worker.policy != self.policy)
            .map(|(id, _)| *id)
            .collect();
        let mut orphans: Vec<(u64, Worker)> = stale
            .into_iter()
            .filter_map(|id| self.workers.remove(&id).map(|worker| (id, worker)))
            .collect();

        let mut outcome = Ok(());
        for job in registry.jobs() {
            if self.workers.contains_key(&job.id) {
                continue;
            }
            let reusable = orphans.iter().position(|(_, worker)| {
                worker.directory == job.directory && worker.policy == self.policy
            });
            let worker = match reusable {
                Some(idx) => {
                    let (old_id, worker) = orphans.swap_remove(idx);
                    let mut stats = self.stats.lock();
                    let carried = stats.remove(&old_id).unwrap_or_default();
                    stats.insert(job.id, carried);
                    worker
                }
                None => match self.spawn_worker(job) {
                    Ok(worker) => worker,
                    Err(e) => {
                        outcome = Err(e);
                        break;
                    }
                },
            };
            self.workers.insert(job.id, worker);
        }

        for (id, worker) in orphans {
            drop(worker.tx);
            self.retired.push(worker.join);
            self.stats.lock().remove(&id);
        }
        outcome
    }

    /// Join retired workers that have already exited.
    fn reap_retired(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .retired
            .drain(..)
            .partition(thread::JoinHandle::is_finished);
        self.retired = running;
        for join in finished {
            if join.join().is_err() {
                eprintln!("[FM-SCHED] worker thread panicked");
            }
        }
    }

    /// Retired workers not yet joined.
    pub fn retired_count(&self) -> usize {
        self.retired.len()
    }

    /// Hand one tick to the job's worker without blocking.
    pub fn dispatch(&self, job: &Job) -> Result<Dispatch> {
        let worker = self.workers.get(&job.id).ok_or_else(|| FmError::Runtime {
            details: format!("no worker for job {} (id {})", job.name, job.id),
        })?;

        match worker.tx.try_send(job.tick()) {
            Ok(()) => Ok(Dispatch::Accepted),
            Err(TrySendError::Full(_)) => Ok(self.record_skip(job)),
            Err(TrySendError::Disconnected(_)) => Err(worker_gone(job)),
        }
    }

    /// Like [`WorkerPool::dispatch`], but waits up to `wait` for the worker
    /// to become free. Used for on-demand sweeps.
    pub fn dispatch_within(&self, job: &Job, wait: Duration) -> Result<Dispatch> {
        let worker = self.workers.get(&job.id).ok_or_else(|| FmError::Runtime {
            details: format!("no worker for job {} (id {})", job.name, job.id),
        })?;

        match worker.tx.send_timeout(job.tick(), wait) {
            Ok(()) => Ok(Dispatch::Accepted),
            Err(SendTimeoutError::Timeout(_)) => Ok(self.record_skip(job)),
            Err(SendTimeoutError::Disconnected(_)) => Err(worker_gone(job)),
        }
    }

    fn record_skip(&self, job: &Job) -> Dispatch {
        self.stats.lock().entry(job.id).or_default().skipped += 1;
        if let Some(logger) = &self.logger {
            logger.send(ActivityEvent::JobSkipped {
                name: job.name.clone(),
                reason: format!("previous pass still running (overlap={})", self.policy),
            });
        }
        Dispatch::Skipped
    }

    pub fn stats(&self, id: u64) -> Option<JobStats> {
        self.stats.lock().get(&id).cloned()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Close every channel and wait for in-flight passes to finish.
    pub fn shutdown(&mut self) {
        for (_, worker) in self.workers.drain() {
            drop(worker.tx);
            self.retired.push(worker.join);
        }
        for join in self.retired.drain(..) {
            if join.join().is_err() {
                eprintln!("[FM-SCHED] worker thread panicked");
            }
        }
    }

    fn spawn_worker(&self, job: &Job) -> Result<Worker> {
        let (tx, rx) = tick_channel(self.policy);
        let enforcer = self.enforcer.clone();
        let stats = Arc::clone(&self.stats);

        let join = thread::Builder::new()
            .name(format!("fileman-job-{}", job.id))
            .spawn(move || worker_main(&rx, &enforcer, &stats))
            .map_err(|source| FmError::Runtime {
                details: format!("failed to spawn worker for {}: {source}", job.name),
            })?;

        self.stats.lock().entry(job.id).or_default();
        Ok(Worker {
            tx,
            join,
            directory: job.directory.clone(),
            policy: self.policy,
        })
    }
}

fn worker_gone(job: &Job) -> FmError {
    FmError::Runtime {
        details: format!("worker for {} has exited", job.name),
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_main(
    rx: &Receiver<Tick>,
    enforcer: &RetentionEnforcer,
    stats: &Mutex<HashMap<u64, JobStats>>,
) {
    while let Ok(tick) = rx.recv() {
        let report = enforcer.delete_old_files(&tick.directory, tick.age_threshold);

        // A job retired mid-pass has no entry left to update.
        let mut guard = stats.lock();
        if let Some(entry) = guard.get_mut(&tick.job_id) {
            entry.passes += 1;
            entry.deleted += report.deleted.len() as u64;
            entry.failures += report.failures.len() as u64;
            entry.last_run = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FixedClock;
    use crate::core::config::WatchedDirectory;
    use crate::platform::fs::{DirEntry, FileSystem, MockEntry, MockFileSystem};
    use chrono::TimeZone;
    use std::path::Path;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 23, h, m, s).unwrap()
    }

    fn config(cron: &str, paths: &[&str]) -> Config {
        Config {
            cron: cron.to_string(),
            overlap: OverlapPolicy::Skip,
            jsonl_log: None,
            watched_directories: paths
                .iter()
                .map(|p| WatchedDirectory {
                    path: PathBuf::from(p),
                    age: 7.0,
                })
                .collect(),
            source: Default::default(),
        }
    }

    #[test]
    fn registry_names_and_numbers_jobs() {
        let cfg = config("*/5 * * * *", &["/srv/a", "/srv/b"]);
        let registry = JobRegistry::from_config(&cfg, at(10, 0, 0)).unwrap();

        let names: Vec<&str> = registry.jobs().iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["PathCleaner-/srv/a", "PathCleaner-/srv/b"]);
        let ids: Vec<u64> = registry.jobs().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(registry.jobs()[0].next_fire(), Some(at(10, 5, 0)));
    }

    #[test]
    fn ids_keep_increasing_across_replacements() {
        let cfg = config("* * * * *", &["/a"]);
        let mut registry = JobRegistry::from_config(&cfg, at(10, 0, 0)).unwrap();
        registry
            .replace_from_config(&config("* * * * *", &["/a", "/b"]), at(10, 0, 0))
            .unwrap();
        let ids: Vec<u64> = registry.jobs().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![1, 2]);

        registry
            .replace_from_config(&config("*/2 * * * *", &["/a", "/b"]), at(10, 0, 0))
            .unwrap();
        let ids: Vec<u64> = registry.jobs().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![3, 4]);

        let id = registry
            .register(PathBuf::from("/c"), 1.0, "0 * * * *", at(10, 0, 0))
            .unwrap();
        assert_eq!(id, 5);
    }

    #[test]
    fn unchanged_job_keeps_id_and_next_fire() {
        let mut registry =
            JobRegistry::from_config(&config("*/5 * * * *", &["/a"]), at(10, 0, 0)).unwrap();
        registry.replace_from_config(&config("*/5 * * * *", &["/a"]), at(10, 7, 0)).unwrap();
        assert_eq!(registry.jobs()[0].id, 1);
        assert_eq!(registry.jobs()[0].next_fire(), Some(at(10, 5, 0)));

        let mut older = config("*/5 * * * *", &["/a"]);
        older.watched_directories[0].age = 30.0;
        registry.replace_from_config(&older, at(10, 7, 0)).unwrap();
        assert_eq!(registry.jobs()[0].id, 2);
        assert_eq!(registry.jobs()[0].next_fire(), Some(at(10, 10, 0)));
    }

    #[test]
    fn failed_replacement_keeps_existing_jobs() {
        let mut registry =
            JobRegistry::from_config(&config("* * * * *", &["/a"]), at(10, 0, 0)).unwrap();
        let err = registry
            .replace_from_config(&config("nonsense", &["/b"]), at(10, 0, 0))
            .unwrap_err();
        assert_eq!(err.code(), "FM-1004");
        assert_eq!(registry.jobs()[0].directory, PathBuf::from("/a"));
    }

    #[test]
    fn due_fires_once_and_advances() {
        let mut registry =
            JobRegistry::from_config(&config("*/5 * * * *", &["/a"]), at(10, 0, 0)).unwrap();

        assert!(registry.due(at(10, 4, 59)).is_empty());

        let due: Vec<u64> = registry.due(at(10, 5, 0)).iter().map(|j| j.id).collect();
        assert_eq!(due, vec![1]);
        assert_eq!(registry.jobs()[0].next_fire(), Some(at(10, 10, 0)));

        assert!(registry.due(at(10, 5, 0)).is_empty());
    }

    #[test]
    fn missed_ticks_coalesce() {
        let mut registry =
            JobRegistry::from_config(&config("* * * * *", &["/a"]), at(10, 0, 0)).unwrap();

        let due = registry.due(at(10, 30, 30));
        assert_eq!(due.len(), 1);
        assert_eq!(registry.jobs()[0].next_fire(), Some(at(10, 31, 0)));
    }

    #[test]
    fn next_wakeup_is_earliest_job() {
        let mut registry = JobRegistry::new();
        registry
            .register(PathBuf::from("/hourly"), 1.0, "0 * * * *", at(10, 0, 0))
            .unwrap();
        registry
            .register(PathBuf::from("/minutely"), 1.0, "* * * * *", at(10, 0, 0))
            .unwrap();
        assert_eq!(registry.next_wakeup(), Some(at(10, 1, 0)));
        assert_eq!(JobRegistry::new().next_wakeup(), None);
    }

    #[test]
    fn upcoming_lists_future_fires() {
        let registry =
            JobRegistry::from_config(&config("0 */6 * * *", &["/a"]), at(10, 0, 0)).unwrap();
        let fires = registry.jobs()[0].upcoming(at(10, 0, 0), 3);
        let midnight = Utc.with_ymd_and_hms(2025, 8, 24, 0, 0, 0).unwrap();
        assert_eq!(fires, vec![at(12, 0, 0), at(18, 0, 0), midnight]);
    }

    #[test]
    fn skip_channel_refuses_without_a_waiting_worker() {
        let (tx, _rx) = tick_channel(OverlapPolicy::Skip);
        let tick = Tick {
            job_id: 1,
            job_name: "PathCleaner-/a".to_string(),
            directory: PathBuf::from("/a"),
            age_threshold: 1.0,
        };
        assert!(matches!(tx.try_send(tick), Err(TrySendError::Full(_))));
    }

    #[test]
    fn queue_channel_buffers_exactly_one() {
        let (tx, _rx) = tick_channel(OverlapPolicy::Queue);
        let tick = Tick {
            job_id: 1,
            job_name: "PathCleaner-/a".to_string(),
            directory: PathBuf::from("/a"),
            age_threshold: 1.0,
        };
        assert!(tx.try_send(tick.clone()).is_ok());
        assert!(matches!(tx.try_send(tick), Err(TrySendError::Full(_))));
    }

    const NOW: i64 = 1_755_907_200;

    fn enforcer(fs: Arc<dyn FileSystem>) -> RetentionEnforcer {
        RetentionEnforcer::new(fs, Arc::new(FixedClock::new(NOW)))
    }

    #[test]
    fn queued_tick_runs_a_pass() {
        let mock = Arc::new(MockFileSystem::new().with_dir(
            "/a",
            vec![
                MockEntry::file("old", NOW - 10 * 86_400),
                MockEntry::file("new", NOW),
            ],
        ));
        let mut registry = JobRegistry::new();
        let id = registry
            .register(PathBuf::from("/a"), 7.0, "* * * * *", at(10, 0, 0))
            .unwrap();

        let mut pool = WorkerPool::new(OverlapPolicy::Queue, enforcer(mock.clone()), None);
        pool.sync(&registry).unwrap();
        assert_eq!(pool.worker_count(), 1);

        let job = registry.get(id).unwrap().clone();
        assert_eq!(pool.dispatch(&job).unwrap(), Dispatch::Accepted);
        pool.shutdown();

        assert_eq!(mock.delete_requests(), vec![PathBuf::from("/a/old")]);
        let stats = pool.stats(id).unwrap();
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.deleted, 1);
        assert!(stats.last_run.is_some());
    }

    /// Blocks every listing until the test releases it.
    struct GatedFileSystem {
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl FileSystem for GatedFileSystem {
        fn read_dir(&self, _path: &Path) -> Result<Vec<Box<dyn DirEntry>>> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            Ok(Vec::new())
        }

        fn delete_file(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn busy_worker_skips_ticks() {
        let (entered_tx, entered_rx) = bounded(4);
        let (release_tx, release_rx) = bounded(4);
        let fs = Arc::new(GatedFileSystem {
            entered: entered_tx,
            release: release_rx,
        });

        let mut registry = JobRegistry::new();
        let id = registry
            .register(PathBuf::from("/slow"), 1.0, "* * * * *", at(10, 0, 0))
            .unwrap();
        let job = registry.get(id).unwrap().clone();

        let mut pool = WorkerPool::new(OverlapPolicy::Skip, enforcer(fs), None);
        pool.sync(&registry).unwrap();

        // The worker may not be parked in recv yet; retry until it takes the tick.
        let mut accepted = false;
        for _ in 0..500 {
            if pool.dispatch(&job).unwrap() == Dispatch::Accepted {
                accepted = true;
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(accepted);
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let skipped_before = pool.stats(id).map_or(0, |s| s.skipped);
        assert_eq!(pool.dispatch(&job).unwrap(), Dispatch::Skipped);
        assert_eq!(pool.stats(id).unwrap().skipped, skipped_before + 1);

        release_tx.send(()).unwrap();
        pool.shutdown();
        assert_eq!(pool.stats(id).unwrap().passes, 1);
    }

    #[test]
    fn dispatch_within_waits_for_an_idle_worker() {
        let mock = Arc::new(
            MockFileSystem::new().with_dir("/a", vec![MockEntry::file("old", NOW - 30 * 86_400)]),
        );
        let mut registry = JobRegistry::new();
        let id = registry
            .register(PathBuf::from("/a"), 7.0, "* * * * *", at(10, 0, 0))
            .unwrap();
        let job = registry.get(id).unwrap().clone();

        let mut pool = WorkerPool::new(OverlapPolicy::Skip, enforcer(mock.clone()), None);
        pool.sync(&registry).unwrap();

        let outcome = pool.dispatch_within(&job, Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, Dispatch::Accepted);
        pool.shutdown();
        assert_eq!(mock.delete_requests(), vec![PathBuf::from("/a/old")]);
    }

    #[test]
    fn sync_retires_removed_jobs() {
        let mock: Arc<dyn FileSystem> = Arc::new(MockFileSystem::new());
        let mut registry =
            JobRegistry::from_config(&config("* * * * *", &["/a", "/b"]), at(10, 0, 0)).unwrap();
        let mut pool = WorkerPool::new(OverlapPolicy::Skip, enforcer(mock), None);
        pool.sync(&registry).unwrap();
        assert_eq!(pool.worker_count(), 2);

        registry
            .replace_from_config(&config("* * * * *", &["/c"]), at(10, 0, 0))
            .unwrap();
        pool.sync(&registry).unwrap();
        assert_eq!(pool.worker_count(), 1);
        pool.shutdown();
        assert_eq!(pool.worker_count(), 0);
    }

    #[test]
    fn replaced_job_inherits_busy_worker() {
        let (entered_tx, entered_rx) = bounded(4);
        let (release_tx, release_rx) = bounded(4);
        let fs = Arc::new(GatedFileSystem {
            entered: entered_tx,
            release: release_rx,
        });

        let mut registry =
            JobRegistry::from_config(&config("* * * * *", &["/slow"]), at(10, 0, 0)).unwrap();
        let before = registry.jobs()[0].clone();
        let mut pool = WorkerPool::new(OverlapPolicy::Skip, enforcer(fs), None);
        pool.sync(&registry).unwrap();

        let mut accepted = false;
        for _ in 0..500 {
            if pool.dispatch(&before).unwrap() == Dispatch::Accepted {
                accepted = true;
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(accepted);
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let mut changed = config("* * * * *", &["/slow"]);
        changed.watched_directories[0].age = 30.0;
        registry.replace_from_config(&changed, at(10, 0, 0)).unwrap();
        pool.sync(&registry).unwrap();
        let after = registry.jobs()[0].clone();
        assert_ne!(after.id, before.id);
        assert_eq!(pool.worker_count(), 1);
        assert_eq!(pool.retired_count(), 0);

        // The pass started under the old id is still running.
        assert_eq!(pool.dispatch(&after).unwrap(), Dispatch::Skipped);
        assert_eq!(pool.stats(after.id).unwrap().skipped, 1);
        assert!(pool.stats(before.id).is_none());

        release_tx.send(()).unwrap();
        pool.shutdown();
    }

    #[test]
    fn sync_joins_finished_retired_workers() {
        let mock: Arc<dyn FileSystem> = Arc::new(MockFileSystem::new());
        let mut registry =
            JobRegistry::from_config(&config("* * * * *", &["/a"]), at(10, 0, 0)).unwrap();
        let mut pool = WorkerPool::new(OverlapPolicy::Skip, enforcer(mock), None);
        pool.sync(&registry).unwrap();

        for (round, path) in ["/b", "/c", "/d"].into_iter().enumerate() {
            registry
                .replace_from_config(&config("* * * * *", &[path]), at(10, 0, 0))
                .unwrap();
            // Idle workers exit as soon as their channel closes.
            for _ in 0..500 {
                if pool.retired.iter().all(thread::JoinHandle::is_finished) {
                    break;
                }
                thread::sleep(Duration::from_millis(2));
            }
            pool.sync(&registry).unwrap();
            assert_eq!(pool.worker_count(), 1, "round {round}");
            assert!(pool.retired_count() <= 1, "round {round}");
        }
        pool.shutdown();
        assert_eq!(pool.retired_count(), 0);
    }

    #[test]
    fn policy_change_respawns_workers() {
        let mock: Arc<dyn FileSystem> = Arc::new(MockFileSystem::new());
        let registry =
            JobRegistry::from_config(&config("* * * * *", &["/a"]), at(10, 0, 0)).unwrap();
        let mut pool = WorkerPool::new(OverlapPolicy::Skip, enforcer(mock), None);
        pool.sync(&registry).unwrap();

        pool.set_policy(OverlapPolicy::Queue);
        pool.sync(&registry).unwrap();
        assert_eq!(pool.worker_count(), 1);
        assert_eq!(pool.retired_count(), 1);

        // A one-slot channel takes a tick even before the worker is parked.
        let job = registry.jobs()[0].clone();
        assert_eq!(pool.dispatch(&job).unwrap(), Dispatch::Accepted);
        pool.shutdown();
    }

    #[test]
    fn dispatch_to_unknown_job_is_an_error() {
        let mock: Arc<dyn FileSystem> = Arc::new(MockFileSystem::new());
        let mut registry = JobRegistry::new();
        registry
            .register(PathBuf::from("/a"), 1.0, "* * * * *", at(10, 0, 0))
            .unwrap();
        let mut pool = WorkerPool::new(OverlapPolicy::Skip, enforcer(mock), None);
        let err = pool.dispatch(&registry.jobs()[0]).unwrap_err();
        assert_eq!(err.code(), "FM-3900");
    }
}
