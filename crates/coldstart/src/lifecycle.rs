//! Visibility lifecycle: host callbacks and the warm/hot start classifier.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::clock::Uptime;
use crate::record::RecordMutator;

/// Whether any part of the application is visible to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    /// At least one surface is visible.
    Visible,
    /// Nothing is visible.
    NotVisible,
}

impl Visibility {
    /// Stable name used when persisting the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Visible => "VISIBLE",
            Self::NotVisible => "NOT_VISIBLE",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Error returned when a persisted visibility name is not recognised.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown visibility state: {0}")]
pub struct VisibilityParseError(String);

impl FromStr for Visibility {
    type Err = VisibilityParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "VISIBLE" => Ok(Self::Visible),
            "NOT_VISIBLE" => Ok(Self::NotVisible),
            other => Err(VisibilityParseError(other.to_owned())),
        }
    }
}

/// Start temperature hint the host attaches to a visibility change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Temperature {
    /// Surfaces are recreated from scratch.
    Cold,
    /// Surfaces are recreated from saved state.
    Warm,
    /// Existing surfaces are brought back to the front.
    Hot,
    /// The host did not classify the change.
    Unknown,
}

impl fmt::Display for Temperature {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Cold => "cold",
            Self::Warm => "warm",
            Self::Hot => "hot",
            Self::Unknown => "unknown",
        };
        formatter.write_str(label)
    }
}

/// Callback invoked by the host on every visibility change.
pub type VisibilityCallback = Box<dyn Fn(Visibility, Temperature) + Send + Sync>;

/// Callback invoked by the host once it knows whether this start follows an
/// install or upgrade.
pub type UpgradeCallback = Box<dyn FnOnce(RecordMutator) + Send>;

/// Host source of visibility changes.
pub trait LifecycleSource: Send + Sync {
    /// Registers `callback` for every future visibility change.
    fn register_visibility_callback(&self, callback: VisibilityCallback);
}

/// Host source of install and upgrade detection.
pub trait UpgradeSource: Send + Sync {
    /// Registers `callback` to receive the detected upgrade mutation.
    fn register_upgrade_callback(&self, callback: UpgradeCallback);
}

/// A foreground transition classified as a warm or hot start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WarmStartEvent {
    /// Host hint attached to the transition.
    pub temperature: Temperature,
    /// Time spent not visible before the transition.
    pub background_elapsed: Duration,
    /// Time from the transition to the next rendered frame.
    pub resume_to_next_frame: Duration,
}

/// Outcome of feeding a visibility change to the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Same state as before; nothing to record.
    Unchanged,
    /// Became visible before the first work item drained: part of the cold
    /// start, never a warm start.
    ColdStartPart,
    /// Became not visible.
    Backgrounded,
    /// Became visible after the first work item drained, having been not
    /// visible for `background_elapsed`.
    Resumed {
        /// Time spent not visible.
        background_elapsed: Duration,
    },
    /// Became visible after the first work item drained, without a recorded
    /// background entry to measure from.
    VisibleWithoutBackground,
}

/// Visibility state machine separating cold-start visibility from warm and
/// hot restarts.
#[derive(Debug, Clone, Default)]
pub struct LifecycleClassifier {
    state: Option<Visibility>,
    after_first_work_item: bool,
    entered_background: Option<Uptime>,
}

impl LifecycleClassifier {
    /// Builds a classifier with an unknown state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: None,
            after_first_work_item: false,
            entered_background: None,
        }
    }

    /// Marks the first work item as drained; later resumes are warm starts.
    pub fn first_work_item_drained(&mut self) {
        self.after_first_work_item = true;
    }

    /// Last known visibility.
    #[must_use]
    pub const fn state(&self) -> Option<Visibility> {
        self.state
    }

    /// Feeds a visibility change delivered at `now`.
    pub fn on_change(&mut self, visibility: Visibility, now: Uptime) -> Transition {
        if self.state == Some(visibility) {
            return Transition::Unchanged;
        }
        self.state = Some(visibility);
        match visibility {
            Visibility::NotVisible => {
                self.entered_background = Some(now);
                Transition::Backgrounded
            }
            Visibility::Visible if !self.after_first_work_item => Transition::ColdStartPart,
            Visibility::Visible => match self.entered_background.take() {
                Some(entered) => Transition::Resumed {
                    background_elapsed: now.saturating_elapsed_since(entered),
                },
                None => Transition::VisibleWithoutBackground,
            },
        }
    }
}
