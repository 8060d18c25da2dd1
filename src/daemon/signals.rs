//! Process signals and the systemd watchdog.
//!
//! SIGTERM/SIGINT stop the daemon, SIGHUP reloads the configuration and
//! SIGUSR1 runs every job once right away. Handlers only flip atomic flags;
//! the main loop polls them between ticks.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

// ──────────────────── signal flags ────────────────────

/// Flags shared between the signal handlers and the main loop.
#[derive(Clone, Default)]
pub struct SignalFlags {
    shutdown: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
    sweep: Arc<AtomicBool>,
}

impl SignalFlags {
    /// Flags wired to the process signals. Registration failures are reported
    /// on stderr and otherwise ignored.
    pub fn install() -> Self {
        let flags = Self::default();
        flags.register();
        flags
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Whether a reload was requested since the last call.
    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::Relaxed)
    }

    /// Whether an immediate sweep was requested since the last call.
    pub fn take_sweep(&self) -> bool {
        self.sweep.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn request_reload(&self) {
        self.reload.store(true, Ordering::Relaxed);
    }

    pub fn request_sweep(&self) {
        self.sweep.store(true, Ordering::Relaxed);
    }

    fn register(&self) {
        for (signal, name) in [(SIGTERM, "SIGTERM"), (SIGINT, "SIGINT")] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&self.shutdown)) {
                eprintln!("[FM-SIGNAL] failed to register {name}: {e}");
            }
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGHUP, SIGUSR1};
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.reload)) {
                eprintln!("[FM-SIGNAL] failed to register SIGHUP: {e}");
            }
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.sweep)) {
                eprintln!("[FM-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

// ──────────────────── watchdog heartbeat ────────────────────

/// Sends `WATCHDOG=1` to systemd at half the configured watchdog period.
pub struct WatchdogHeartbeat {
    interval: Duration,
    last_beat: Instant,
    enabled: bool,
}

impl WatchdogHeartbeat {
    /// `watchdog_sec` is systemd's `WatchdogSec`; zero disables the heartbeat.
    pub fn new(watchdog_sec: u64) -> Self {
        Self {
            interval: Duration::from_secs(watchdog_sec / 2),
            last_beat: Instant::now(),
            enabled: watchdog_sec > 0,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Notify systemd if the interval has elapsed. Returns whether it did.
    pub fn maybe_notify(&mut self, status: &str) -> bool {
        if !self.enabled || self.last_beat.elapsed() < self.interval {
            return false;
        }
        self.last_beat = Instant::now();
        sd_notify(status);
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// No-op unless `NOTIFY_SOCKET` is set.
#[cfg(target_os = "linux")]
fn sd_notify(status: &str) {
    use std::os::unix::net::UnixDatagram;

    let Some(socket_path) = std::env::var("NOTIFY_SOCKET")
        .ok()
        .filter(|p| !p.is_empty())
    else {
        return;
    };
    let Ok(sock) = UnixDatagram::unbound() else {
        return;
    };
    let msg = format!("WATCHDOG=1\nSTATUS={status}\n");
    let _ = sock.send_to(msg.as_bytes(), &socket_path);
}

#[cfg(not(target_os = "linux"))]
fn sd_notify(_status: &str) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_flags_are_clear() {
        let flags = SignalFlags::default();
        assert!(!flags.should_shutdown());
        assert!(!flags.take_reload());
        assert!(!flags.take_sweep());
    }

    #[test]
    fn shutdown_is_sticky() {
        let flags = SignalFlags::default();
        flags.request_shutdown();
        assert!(flags.should_shutdown());
        assert!(flags.should_shutdown());
    }

    #[test]
    fn reload_and_sweep_clear_on_read() {
        let flags = SignalFlags::default();
        flags.request_reload();
        flags.request_sweep();
        assert!(flags.take_reload());
        assert!(!flags.take_reload());
        assert!(flags.take_sweep());
        assert!(!flags.take_sweep());
    }

    #[test]
    fn clones_share_state() {
        let flags = SignalFlags::default();
        let other = flags.clone();
        flags.request_shutdown();
        assert!(other.should_shutdown());
    }

    #[test]
    fn disabled_watchdog_never_fires() {
        let mut wd = WatchdogHeartbeat::disabled();
        assert!(!wd.is_enabled());
        assert!(!wd.maybe_notify("idle"));
    }

    #[test]
    fn watchdog_waits_for_interval() {
        let mut wd = WatchdogHeartbeat::new(120);
        assert!(wd.is_enabled());
        assert!(!wd.maybe_notify("idle"));

        wd.last_beat = Instant::now() - Duration::from_secs(61);
        assert!(wd.maybe_notify("idle"));
        assert!(!wd.maybe_notify("idle"));
    }
}
