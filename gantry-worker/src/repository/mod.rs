//! Queue communication layer
//!
//! Traits over the remote queue service plus their HTTP implementations.

pub mod queue;

pub use queue::{HttpWorkQueue, WorkQueue};
