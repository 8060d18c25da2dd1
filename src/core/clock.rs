//! Wall-clock access and file age computation.

/// Seconds in one day; ages are expressed in fractional days.
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Source of the current instant, shared across jobs.
pub trait Clock: Send + Sync {
    /// Current time as Unix epoch seconds.
    fn now_epoch_secs(&self) -> i64;

    /// Days elapsed between `reference` (epoch seconds) and now.
    ///
    /// Positive for past references, negative for future ones, exactly zero
    /// when `reference` is the current second.
    #[allow(clippy::cast_precision_loss)]
    fn calculate_age(&self, reference: i64) -> f64 {
        let diff = self.now_epoch_secs().saturating_sub(reference);
        diff as f64 / SECONDS_PER_DAY
    }
}

/// Clock backed by the system's UTC time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Clock frozen at a fixed instant, for deterministic tests and replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock {
    now: i64,
}

impl FixedClock {
    /// Freeze the clock at `now_epoch_secs`.
    #[must_use]
    pub const fn new(now_epoch_secs: i64) -> Self {
        Self {
            now: now_epoch_secs,
        }
    }
}

impl Clock for FixedClock {
    fn now_epoch_secs(&self) -> i64 {
        self.now
    }
}
