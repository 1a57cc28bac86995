//! Initialization failures and skips.

use std::fmt;

use thiserror::Error;

use crate::process::ProcessInfoError;

/// Reasons `init` could not build a startup record. The message is what
/// [`crate::StartupRecord::NotInitialized`] carries afterwards.
#[derive(Debug, Error)]
pub enum InitError {
    /// Instrumentation was initialized from a context that does not own the
    /// process.
    #[error("startup instrumentation requires an application context, got a {kind} context")]
    WrongContext {
        /// Kind of context supplied.
        kind: String,
    },
    /// The process identity or start time could not be resolved.
    #[error("failed to resolve process information: {source}")]
    ProcessInfo {
        /// Underlying resolution error.
        #[source]
        source: ProcessInfoError,
    },
}

/// Why a call to `init` was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitSkip {
    /// Called from a thread other than the coordination thread.
    OffThread,
    /// `init` already ran in this process.
    AlreadyInitialized,
}

impl fmt::Display for InitSkip {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OffThread => formatter.write_str("off_thread"),
            Self::AlreadyInitialized => formatter.write_str("already_initialized"),
        }
    }
}
