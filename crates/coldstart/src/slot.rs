//! Lock-free holder for the current startup record.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::record::{AppStartData, StartupRecord};

/// Reason reported until initialization succeeds.
pub const NOT_YET_INITIALIZED: &str = "startup instrumentation has not been initialized";

/// Shared slot holding the latest [`StartupRecord`] snapshot.
///
/// Readers load an `Arc` and never block. Writers replace the snapshot
/// wholesale; a reader either sees the previous record or the next one.
#[derive(Debug)]
pub struct RecordSlot {
    current: ArcSwap<StartupRecord>,
}

impl Default for RecordSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordSlot {
    /// Builds a slot holding the not-initialized sentinel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(StartupRecord::not_initialized(NOT_YET_INITIALIZED)),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn load(&self) -> Arc<StartupRecord> {
        self.current.load_full()
    }

    /// Installs the initial record.
    pub fn install(&self, data: AppStartData) {
        self.current.store(Arc::new(StartupRecord::Started(data)));
    }

    /// Replaces the sentinel reason; ignored once the record is installed.
    pub fn fail(&self, reason: impl Into<String>) {
        let failed = Arc::new(StartupRecord::not_initialized(reason));
        self.current.rcu(|current| {
            if current.is_initialized() {
                Arc::clone(current)
            } else {
                Arc::clone(&failed)
            }
        });
    }

    /// Applies `change` to the current data.
    ///
    /// `change` returns `None` when there is nothing to update. Returns the
    /// installed data when the record changed; uninitialized slots never
    /// change.
    pub fn update<F>(&self, mut change: F) -> Option<AppStartData>
    where
        F: FnMut(&AppStartData) -> Option<AppStartData>,
    {
        let mut current = self.current.load_full();
        loop {
            let data = current.data()?;
            let next = Arc::new(StartupRecord::Started(change(data)?));
            let previous = self.current.compare_and_swap(&current, Arc::clone(&next));
            if Arc::ptr_eq(&previous, &current) {
                return next.data().cloned();
            }
            current = arc_swap::Guard::into_inner(previous);
        }
    }
}
