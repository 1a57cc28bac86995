//! Scenario world shared across BDD steps.

use std::cell::RefCell;
use std::sync::{Arc, Mutex};

use crate::WarmStartEvent;

use super::Harness;

pub struct TestWorld {
    pub harness: Harness,
    warm_starts: Arc<Mutex<Vec<WarmStartEvent>>>,
}

impl TestWorld {
    pub fn new() -> Self {
        let harness = Harness::new();
        let warm_starts = harness.collect_warm_starts();
        Self {
            harness,
            warm_starts,
        }
    }

    pub fn warm_starts(&self) -> Vec<WarmStartEvent> {
        self.warm_starts
            .lock()
            .expect("warm start mutex poisoned")
            .clone()
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

pub fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}
