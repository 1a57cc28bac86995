//! Test suites for the startup instrumentation engine.

mod collaborators;
mod support;
mod unit;
