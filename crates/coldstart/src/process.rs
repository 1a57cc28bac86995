//! Process identity, start time, and importance reported by the host.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Host-reported priority of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessImportance {
    /// Running the foreground UI.
    Foreground,
    /// Running a foreground service.
    ForegroundService,
    /// Visible but not in the foreground.
    Visible,
    /// Perceptible to the user without being visible.
    Perceptible,
    /// Running a background service.
    Service,
    /// Top process while the device sleeps.
    TopSleeping,
    /// Heavy-weight process that cannot save its state.
    CantSaveState,
    /// Cached and killable at will.
    Cached,
    /// Not running.
    Gone,
    /// A host code this crate does not name.
    Other(u32),
}

impl fmt::Display for ProcessImportance {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Foreground => "foreground",
            Self::ForegroundService => "foreground_service",
            Self::Visible => "visible",
            Self::Perceptible => "perceptible",
            Self::Service => "service",
            Self::TopSleeping => "top_sleeping",
            Self::CantSaveState => "cant_save_state",
            Self::Cached => "cached",
            Self::Gone => "gone",
            Self::Other(code) => return write!(formatter, "other({code})"),
        };
        formatter.write_str(label)
    }
}

/// Why the host assigned the current importance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceReason {
    /// No reason given.
    Unknown,
    /// Another process is using a provider hosted here.
    ProviderInUse,
    /// Another process is bound to a service hosted here.
    ServiceInUse,
    /// A host code this crate does not name.
    Other(u32),
}

/// Importance with the reason the host reported for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportanceSnapshot {
    /// Current importance.
    pub importance: ProcessImportance,
    /// Reason code accompanying the importance.
    pub reason_code: ImportanceReason,
    /// Component responsible for the importance, when the host names one.
    pub reason_component: Option<String>,
}

impl ImportanceSnapshot {
    /// Builds a snapshot without a reason.
    #[must_use]
    pub const fn new(importance: ProcessImportance) -> Self {
        Self {
            importance,
            reason_code: ImportanceReason::Unknown,
            reason_component: None,
        }
    }
}

/// A task (window stack) owned by the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppTask {
    /// Component at the top of the task.
    pub top_component: Option<String>,
    /// Component that started the task.
    pub base_component: Option<String>,
    /// Number of components in the task.
    pub component_count: u32,
    /// Milliseconds since the task was last active.
    pub last_active_elapsed_ms: Option<u64>,
}

/// Identity and start time of the current process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Operating system process identifier.
    pub pid: u32,
    /// Process name.
    pub name: String,
    /// Time since the process was created, measured in the operating
    /// system's clock domain when [`ProcessInfoProvider::resolve`] ran.
    pub elapsed_since_start: Duration,
    /// Importance at resolution time, when the host exposes it.
    pub importance: Option<ImportanceSnapshot>,
    /// Tasks currently owned by the process.
    pub tasks: Vec<AppTask>,
}

/// Errors raised while resolving process information.
#[derive(Debug, Error)]
pub enum ProcessInfoError {
    /// The host cannot report process start times.
    #[error("process start time is unavailable: {reason}")]
    Unavailable {
        /// Human-readable explanation.
        reason: String,
    },
    /// Reading a process information file failed.
    #[error("failed to read '{path}': {source}")]
    Read {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A process information file had an unexpected shape.
    #[error("failed to parse '{path}': {message}")]
    Parse {
        /// File that could not be parsed.
        path: PathBuf,
        /// What was wrong with it.
        message: String,
    },
}

/// Collaborator that resolves the current process identity.
pub trait ProcessInfoProvider: Send + Sync {
    /// Resolves the process identity and time since process creation.
    fn resolve(&self) -> Result<ProcessInfo, ProcessInfoError>;

    /// Takes a fresh importance snapshot, when the host exposes one.
    fn importance(&self) -> Option<ImportanceSnapshot>;
}

#[cfg(target_os = "linux")]
pub use procfs::ProcfsProcessInfo;

#[cfg(target_os = "linux")]
mod procfs {
    //! Process information read from `/proc`.

    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::{ImportanceSnapshot, ProcessInfo, ProcessInfoError, ProcessInfoProvider};

    const STAT_PATH: &str = "/proc/self/stat";
    const UPTIME_PATH: &str = "/proc/uptime";
    // Field 22 of stat(5), counted after the parenthesised command name.
    const START_TIME_FIELD: usize = 19;

    /// Provider that derives process age from `/proc/self/stat`.
    ///
    /// Process start ticks and `/proc/uptime` share the boot-time clock, which
    /// keeps running during suspend; the engine reconciles the resulting age
    /// against its own monotonic clock.
    #[derive(Debug, Clone)]
    pub struct ProcfsProcessInfo {
        stat_path: PathBuf,
        uptime_path: PathBuf,
    }

    impl Default for ProcfsProcessInfo {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ProcfsProcessInfo {
        /// Provider reading the live procfs files.
        #[must_use]
        pub fn new() -> Self {
            Self::with_paths(STAT_PATH, UPTIME_PATH)
        }

        /// Provider reading alternative stat and uptime files.
        #[must_use]
        pub fn with_paths(stat_path: impl Into<PathBuf>, uptime_path: impl Into<PathBuf>) -> Self {
            Self {
                stat_path: stat_path.into(),
                uptime_path: uptime_path.into(),
            }
        }
    }

    impl ProcessInfoProvider for ProcfsProcessInfo {
        fn resolve(&self) -> Result<ProcessInfo, ProcessInfoError> {
            let stat = read(&self.stat_path)?;
            let (name, start_ticks) = parse_stat(&self.stat_path, &stat)?;
            let uptime = parse_uptime(&self.uptime_path, &read(&self.uptime_path)?)?;
            let started_after_boot = ticks_to_duration(start_ticks, clock_ticks_per_second()?);
            Ok(ProcessInfo {
                pid: std::process::id(),
                name,
                elapsed_since_start: uptime.saturating_sub(started_after_boot),
                importance: None,
                tasks: Vec::new(),
            })
        }

        fn importance(&self) -> Option<ImportanceSnapshot> {
            None
        }
    }

    fn read(path: &Path) -> Result<String, ProcessInfoError> {
        fs::read_to_string(path).map_err(|source| ProcessInfoError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    fn parse_error(path: &Path, message: impl Into<String>) -> ProcessInfoError {
        ProcessInfoError::Parse {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    /// Returns the command name and start time (in clock ticks after boot).
    pub(super) fn parse_stat(path: &Path, stat: &str) -> Result<(String, u64), ProcessInfoError> {
        let open = stat
            .find('(')
            .ok_or_else(|| parse_error(path, "missing command name"))?;
        let close = stat
            .rfind(')')
            .ok_or_else(|| parse_error(path, "unterminated command name"))?;
        let name = stat
            .get(open + 1..close)
            .ok_or_else(|| parse_error(path, "malformed command name"))?
            .to_owned();
        let rest = stat
            .get(close + 1..)
            .ok_or_else(|| parse_error(path, "missing fields after command name"))?;
        let field = rest
            .split_whitespace()
            .nth(START_TIME_FIELD)
            .ok_or_else(|| parse_error(path, "missing start time field"))?;
        let ticks = field
            .parse::<u64>()
            .map_err(|error| parse_error(path, format!("invalid start time '{field}': {error}")))?;
        Ok((name, ticks))
    }

    pub(super) fn parse_uptime(path: &Path, contents: &str) -> Result<Duration, ProcessInfoError> {
        let field = contents
            .split_whitespace()
            .next()
            .ok_or_else(|| parse_error(path, "empty uptime"))?;
        let (whole, fraction) = field.split_once('.').unwrap_or((field, "0"));
        let seconds = whole
            .parse::<u64>()
            .map_err(|error| parse_error(path, format!("invalid uptime '{field}': {error}")))?;
        let hundredths = fraction
            .get(..2)
            .unwrap_or(fraction)
            .parse::<u64>()
            .map_err(|error| parse_error(path, format!("invalid uptime '{field}': {error}")))?;
        let scale = if fraction.len() == 1 { 100 } else { 10 };
        Ok(Duration::from_secs(seconds) + Duration::from_millis(hundredths * scale))
    }

    pub(super) fn ticks_to_duration(ticks: u64, per_second: u64) -> Duration {
        let per_second = per_second.max(1);
        let seconds = ticks / per_second;
        let remainder = ticks % per_second;
        Duration::from_secs(seconds) + Duration::from_millis(remainder * 1_000 / per_second)
    }

    fn clock_ticks_per_second() -> Result<u64, ProcessInfoError> {
        // SAFETY: sysconf has no preconditions and only reads system limits.
        let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        u64::try_from(ticks)
            .ok()
            .filter(|ticks| *ticks > 0)
            .ok_or_else(|| ProcessInfoError::Unavailable {
                reason: format!("sysconf(_SC_CLK_TCK) returned {ticks}"),
            })
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use rstest::rstest;
        use std::io::Write;

        const SAMPLE_STAT: &str = "4242 (my (odd) app) S 1 4242 4242 0 -1 4194560 \
            1000 0 0 0 12 3 0 0 20 0 4 0 98765 123456789 1234 18446744073709551615";

        #[rstest]
        fn parses_command_name_with_parentheses() {
            let (name, ticks) =
                parse_stat(Path::new(STAT_PATH), SAMPLE_STAT).expect("stat should parse");
            assert_eq!(name, "my (odd) app");
            assert_eq!(ticks, 98_765);
        }

        #[rstest]
        fn rejects_truncated_stat() {
            let error = parse_stat(Path::new(STAT_PATH), "4242 (app) S 1 2")
                .expect_err("truncated stat should fail");
            assert!(error.to_string().contains("start time"));
        }

        #[rstest]
        #[case("350735.47 234388.90", Duration::from_millis(350_735_470))]
        #[case("12.5 1.0", Duration::from_millis(12_500))]
        #[case("7", Duration::from_secs(7))]
        fn parses_uptime(#[case] contents: &str, #[case] expected: Duration) {
            let parsed = parse_uptime(Path::new(UPTIME_PATH), contents).expect("uptime");
            assert_eq!(parsed, expected);
        }

        #[rstest]
        fn converts_ticks() {
            assert_eq!(ticks_to_duration(250, 100), Duration::from_millis(2_500));
            assert_eq!(ticks_to_duration(5, 0), Duration::from_secs(5));
        }

        #[rstest]
        fn resolves_from_alternative_files() {
            let dir = tempfile::tempdir().expect("temp dir");
            let stat_path = dir.path().join("stat");
            let uptime_path = dir.path().join("uptime");
            let mut stat = fs::File::create(&stat_path).expect("stat file");
            write!(stat, "{SAMPLE_STAT}").expect("write stat");
            fs::write(&uptime_path, "100000.00 1.00").expect("write uptime");

            let provider = ProcfsProcessInfo::with_paths(&stat_path, &uptime_path);
            let info = provider.resolve().expect("resolve");
            assert_eq!(info.name, "my (odd) app");
            assert!(info.elapsed_since_start <= Duration::from_secs(100_000));
            assert!(provider.importance().is_none());
        }

        #[rstest]
        fn live_procfs_resolves_current_process() {
            let info = ProcfsProcessInfo::new().resolve().expect("live procfs");
            assert_eq!(info.pid, std::process::id());
            assert!(!info.name.is_empty());
        }
    }
}
