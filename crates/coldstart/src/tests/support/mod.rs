//! Shared fixtures for the engine test suites.

mod harness;
mod world;

pub use harness::{
    Harness, PROCESS_AGE_MS, PROCESS_START_MS, START_UPTIME_MS, WALL_START_MS, sample_process,
};
pub use world::{TestWorld, world};
