//! The startup record and its immutable snapshots.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::lifecycle::Visibility;
use crate::process::{AppTask, ImportanceReason, ProcessImportance};

/// Transformation applied to the record through the copy-on-write path.
pub type RecordMutator = Box<dyn FnOnce(AppStartData) -> AppStartData + Send>;

/// Whether this start follows an install or an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeStatus {
    /// Same version as the previous session.
    NormalStart,
    /// First start after a fresh install.
    FreshInstall,
    /// First start after the version changed.
    Upgraded,
    /// First start after the application data was cleared.
    DataCleared,
}

impl fmt::Display for UpgradeStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NormalStart => "normal_start",
            Self::FreshInstall => "fresh_install",
            Self::Upgraded => "upgraded",
            Self::DataCleared => "data_cleared",
        };
        formatter.write_str(label)
    }
}

/// Install and upgrade details detected by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradeInfo {
    /// Detected start status.
    pub status: UpgradeStatus,
    /// Version of the previous session, when it differs.
    pub previous_version: Option<String>,
}

impl UpgradeInfo {
    /// Mutator that stores these details in the record.
    #[must_use]
    pub fn into_mutator(self) -> RecordMutator {
        Box::new(move |data| AppStartData {
            upgrade: Some(self),
            ..data
        })
    }
}

/// Name and timing of the first externally observable unit instantiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirstComponent {
    /// Component name.
    pub name: String,
    /// Milliseconds since process start.
    pub elapsed_ms: u64,
}

/// First occurrence of a host-named event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomFirstEvent {
    /// Milliseconds since process start.
    pub elapsed_ms: u64,
    /// Opaque payload supplied by the host.
    pub payload: Option<serde_json::Value>,
}

/// Everything known about the current process start.
///
/// Durations are milliseconds. `*_elapsed_ms` fields are monotonic deltas
/// from `process_start_uptime_ms`; `*_elapsed_wall_clock_ms` fields come from
/// the previous session and are wall-clock deltas. Checkpoint fields move from
/// `None` to `Some` at most once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppStartData {
    /// Process identifier.
    pub pid: u32,
    /// Process name.
    pub process_name: String,
    /// Process creation instant on the monotonic clock.
    pub process_start_uptime_ms: u64,
    /// Process creation instant on the wall clock.
    pub process_start_wall_clock_ms: i64,
    /// When the instrumentation code was first loaded.
    pub first_app_code_loaded_elapsed_ms: u64,
    /// When initialization was invoked.
    pub engine_init_called_elapsed_ms: u64,
    /// When the first work item posted at init drained.
    pub first_work_item_drained_elapsed_ms: Option<u64>,
    /// When the coordination thread first went idle.
    pub first_idle_elapsed_ms: Option<u64>,
    /// When the first work item posted at the front of the queue ran.
    pub first_priority_work_item_elapsed_ms: Option<u64>,
    /// Importance at init.
    pub process_importance: Option<ProcessImportance>,
    /// Importance once the first work item drained.
    pub process_importance_after_first_work_item: Option<ProcessImportance>,
    /// Reason code accompanying the importance at init.
    pub importance_reason_code: Option<ImportanceReason>,
    /// Component responsible for the importance at init.
    pub importance_reason_component: Option<String>,
    /// Tasks owned by the process at init.
    pub app_tasks: Vec<AppTask>,
    /// Last visibility recorded by the previous session.
    pub last_visible_state: Option<Visibility>,
    /// Wall-clock time since the previous session's last visibility change.
    pub last_visible_state_changed_elapsed_wall_clock_ms: Option<u64>,
    /// Wall-clock time since the previous session was last known alive.
    pub last_alive_elapsed_wall_clock_ms: Option<u64>,
    /// First component instantiated after the record existed.
    pub first_component_instantiated: Option<FirstComponent>,
    /// First frame rendered after the host declared itself ready.
    pub first_frame_after_ready_elapsed_ms: Option<u64>,
    /// First occurrence of each host-named event.
    pub custom_first_events: BTreeMap<String, CustomFirstEvent>,
    /// Install or upgrade details, once detected.
    pub upgrade: Option<UpgradeInfo>,
}

impl AppStartData {
    /// Copy with the first work item checkpoint set, if still absent.
    #[must_use]
    pub fn with_first_work_item_drained(
        &self,
        elapsed_ms: u64,
        importance: Option<ProcessImportance>,
    ) -> Option<Self> {
        self.first_work_item_drained_elapsed_ms
            .is_none()
            .then(|| Self {
                first_work_item_drained_elapsed_ms: Some(elapsed_ms),
                process_importance_after_first_work_item: importance,
                ..self.clone()
            })
    }

    /// Copy with the first idle checkpoint set, if still absent.
    #[must_use]
    pub fn with_first_idle(&self, elapsed_ms: u64) -> Option<Self> {
        self.first_idle_elapsed_ms.is_none().then(|| Self {
            first_idle_elapsed_ms: Some(elapsed_ms),
            ..self.clone()
        })
    }

    /// Copy with the first priority work item checkpoint set, if still absent.
    #[must_use]
    pub fn with_first_priority_work_item(&self, elapsed_ms: u64) -> Option<Self> {
        self.first_priority_work_item_elapsed_ms
            .is_none()
            .then(|| Self {
                first_priority_work_item_elapsed_ms: Some(elapsed_ms),
                ..self.clone()
            })
    }

    /// Copy with the first component set, if still absent.
    #[must_use]
    pub fn with_first_component(&self, name: &str, elapsed_ms: u64) -> Option<Self> {
        self.first_component_instantiated.is_none().then(|| Self {
            first_component_instantiated: Some(FirstComponent {
                name: name.to_owned(),
                elapsed_ms,
            }),
            ..self.clone()
        })
    }

    /// Copy with the first frame after the ready signal set, if still absent.
    #[must_use]
    pub fn with_first_frame_after_ready(&self, elapsed_ms: u64) -> Option<Self> {
        self.first_frame_after_ready_elapsed_ms
            .is_none()
            .then(|| Self {
                first_frame_after_ready_elapsed_ms: Some(elapsed_ms),
                ..self.clone()
            })
    }

    /// Copy with a custom event added, if `name` is not already present.
    #[must_use]
    pub fn with_custom_first_event(
        &self,
        name: &str,
        elapsed_ms: u64,
        payload: Option<serde_json::Value>,
    ) -> Option<Self> {
        if self.custom_first_events.contains_key(name) {
            return None;
        }
        let mut events = self.custom_first_events.clone();
        events.insert(
            name.to_owned(),
            CustomFirstEvent {
                elapsed_ms,
                payload,
            },
        );
        Some(Self {
            custom_first_events: events,
            ..self.clone()
        })
    }
}

/// Current view of the startup record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StartupRecord {
    /// Instrumentation is not (or not yet) running.
    NotInitialized {
        /// Why the record is unavailable.
        reason: String,
    },
    /// Instrumentation is running.
    Started(AppStartData),
}

impl StartupRecord {
    /// Sentinel carrying `reason`.
    #[must_use]
    pub fn not_initialized(reason: impl Into<String>) -> Self {
        Self::NotInitialized {
            reason: reason.into(),
        }
    }

    /// The record data, once initialized.
    #[must_use]
    pub const fn data(&self) -> Option<&AppStartData> {
        match self {
            Self::Started(data) => Some(data),
            Self::NotInitialized { .. } => None,
        }
    }

    /// Why the record is unavailable, if it is.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::NotInitialized { reason } => Some(reason.as_str()),
            Self::Started(_) => None,
        }
    }

    /// Whether initialization succeeded.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}
