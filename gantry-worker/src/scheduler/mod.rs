//! Scheduler layer for the worker
//!
//! Drives the poll/claim/admit cycle and the per-claim runners. The
//! poller owns the timer and the gates; each admitted claim executes in
//! its own spawned runner that retires itself through the shared state.

pub mod poller;
pub mod runner;


pub use poller::{PollerDeps, WorkPoller};
pub use runner::ClaimRunner;
