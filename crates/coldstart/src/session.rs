//! Prior-session summary kept in the durable store.
//!
//! Only wall-clock values are persisted: the monotonic clock restarts with
//! every boot, so nothing measured on it can be compared across processes.

use crate::lifecycle::Visibility;
use crate::store::{KeyValueStore, StoreError, StoredValue};

/// Name of the last persisted visibility state.
pub const LAST_VISIBLE_STATE_KEY: &str = "last_visible_state";
/// Wall-clock milliseconds of the last visibility change.
pub const LAST_VISIBLE_STATE_CHANGED_KEY: &str = "last_visible_state_changed_wall_clock";
/// Wall-clock milliseconds of the last heartbeat.
pub const LAST_ALIVE_KEY: &str = "last_alive_wall_clock";

/// What the previous session left behind, as deltas from the current wall
/// clock. Missing or unreadable entries are absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorSession {
    /// Last visibility the previous session recorded.
    pub last_visible_state: Option<Visibility>,
    /// Milliseconds since that visibility change.
    pub last_visible_state_changed_elapsed_ms: Option<u64>,
    /// Milliseconds since the previous session was last known alive.
    pub last_alive_elapsed_ms: Option<u64>,
}

impl PriorSession {
    /// Reads the prior session relative to `wall_now`.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered.
    pub fn read(store: &dyn KeyValueStore, wall_now: i64) -> Result<Self, StoreError> {
        let last_visible_state = store
            .get(LAST_VISIBLE_STATE_KEY)?
            .as_ref()
            .and_then(StoredValue::as_text)
            .and_then(|name| name.parse().ok());
        let changed = store.get(LAST_VISIBLE_STATE_CHANGED_KEY)?;
        let alive = store.get(LAST_ALIVE_KEY)?;
        Ok(Self {
            last_visible_state,
            last_visible_state_changed_elapsed_ms: elapsed_from(changed, wall_now),
            last_alive_elapsed_ms: elapsed_from(alive, wall_now),
        })
    }
}

fn elapsed_from(value: Option<StoredValue>, wall_now: i64) -> Option<u64> {
    let then = value.as_ref().and_then(StoredValue::as_integer)?;
    // The wall clock can move backwards between sessions.
    Some(u64::try_from(wall_now.saturating_sub(then)).unwrap_or(0))
}

/// Persists a visibility change observed at `wall_now`.
///
/// # Errors
///
/// Returns the store error if either entry could not be written.
pub fn record_visibility(
    store: &dyn KeyValueStore,
    visibility: Visibility,
    wall_now: i64,
) -> Result<(), StoreError> {
    store.set(LAST_VISIBLE_STATE_KEY, visibility.as_str().into())?;
    store.set(
        LAST_VISIBLE_STATE_CHANGED_KEY,
        StoredValue::Integer(wall_now),
    )
}

/// Persists a heartbeat observed at `wall_now`.
///
/// # Errors
///
/// Returns the store error if the entry could not be written.
pub fn record_alive(store: &dyn KeyValueStore, wall_now: i64) -> Result<(), StoreError> {
    store.set(LAST_ALIVE_KEY, StoredValue::Integer(wall_now))
}
