//! Monotonic and wall-clock time sources.
//!
//! Elapsed values in the startup record are always monotonic deltas measured
//! from the process start [`Uptime`]. Wall-clock milliseconds only appear where
//! a value has to survive a process restart.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ctor::ctor;
use once_cell::sync::OnceCell;

#[cfg(unix)]
use nix::time::{ClockId, clock_gettime};

static CODE_LOADED: OnceCell<Uptime> = OnceCell::new();

#[ctor]
fn capture_code_loaded() {
    CODE_LOADED.get_or_init(monotonic_now);
}

/// Instant on the monotonic clock, expressed as time since that clock's epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uptime(Duration);

impl Uptime {
    /// Builds an instant from a duration since the monotonic epoch.
    #[must_use]
    pub const fn from_duration(since_epoch: Duration) -> Self {
        Self(since_epoch)
    }

    /// Builds an instant from milliseconds since the monotonic epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Duration since the monotonic epoch.
    #[must_use]
    pub const fn as_duration(self) -> Duration {
        self.0
    }

    /// Whole milliseconds since the monotonic epoch.
    #[must_use]
    pub fn as_millis(self) -> u64 {
        millis(self.0)
    }

    /// Time elapsed between `earlier` and `self`, zero when `earlier` is later.
    #[must_use]
    pub fn saturating_elapsed_since(self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    /// Moves the instant back by `amount`, or `None` before the epoch.
    #[must_use]
    pub fn checked_sub(self, amount: Duration) -> Option<Self> {
        self.0.checked_sub(amount).map(Self)
    }

    /// Moves the instant forward by `amount`.
    #[must_use]
    pub fn checked_add(self, amount: Duration) -> Option<Self> {
        self.0.checked_add(amount).map(Self)
    }
}

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync {
    /// Current monotonic instant.
    fn uptime(&self) -> Uptime;

    /// Current wall-clock time in milliseconds since the Unix epoch.
    fn wall_clock_millis(&self) -> i64;
}

/// Clock backed by `CLOCK_MONOTONIC` and the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn uptime(&self) -> Uptime {
        monotonic_now()
    }

    fn wall_clock_millis(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since_epoch) => i64::try_from(since_epoch.as_millis()).unwrap_or(i64::MAX),
            Err(error) => i64::try_from(error.duration().as_millis())
                .map_or(i64::MIN, |before_epoch| -before_epoch),
        }
    }
}

/// The instant the instrumentation code was first loaded into the process.
///
/// The production anchor is captured by a load-time constructor before any
/// other instrumentation runs; [`ClockAnchor::at`] exists for hosts that
/// capture the instant themselves and for deterministic tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockAnchor {
    loaded_at: Uptime,
}

impl ClockAnchor {
    /// Anchor captured when the library was loaded.
    #[must_use]
    pub fn captured() -> Self {
        Self {
            loaded_at: *CODE_LOADED.get_or_init(monotonic_now),
        }
    }

    /// Anchor at an explicit monotonic instant.
    #[must_use]
    pub const fn at(loaded_at: Uptime) -> Self {
        Self { loaded_at }
    }

    /// Monotonic instant the code was loaded.
    #[must_use]
    pub const fn loaded_at(self) -> Uptime {
        self.loaded_at
    }

    /// How long after `start` the code was loaded.
    #[must_use]
    pub fn elapsed_since(self, start: Uptime) -> Duration {
        self.loaded_at.saturating_elapsed_since(start)
    }
}

/// Monotonic time elapsed since `start` according to `clock`.
pub fn elapsed_since(clock: &dyn Clock, start: Uptime) -> Duration {
    clock.uptime().saturating_elapsed_since(start)
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(unix)]
fn monotonic_now() -> Uptime {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(spec) => {
            let seconds = u64::try_from(spec.tv_sec()).unwrap_or(0);
            let nanos = u32::try_from(spec.tv_nsec()).unwrap_or(0);
            Uptime(Duration::new(seconds, nanos))
        }
        Err(_) => fallback_monotonic_now(),
    }
}

#[cfg(not(unix))]
fn monotonic_now() -> Uptime {
    fallback_monotonic_now()
}

fn fallback_monotonic_now() -> Uptime {
    use once_cell::sync::Lazy;
    use std::time::Instant;

    static BASE: Lazy<Instant> = Lazy::new(Instant::now);
    Uptime(BASE.elapsed())
}
