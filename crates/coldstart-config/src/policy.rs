use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Behaviour when a coordination-thread-only checkpoint is called elsewhere.
///
/// Checkpoints invoked from the wrong thread are never recorded. The policy
/// only decides whether the misuse is surfaced loudly.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OffThreadPolicy {
    /// Panic with a contract violation message.
    Panic,
    /// Drop the call silently.
    Ignore,
}

impl OffThreadPolicy {
    /// Policy used when nothing is configured: loud in debug builds, silent
    /// in release builds.
    #[must_use]
    pub const fn for_build() -> Self {
        if cfg!(debug_assertions) {
            Self::Panic
        } else {
            Self::Ignore
        }
    }
}
