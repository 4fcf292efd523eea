//! Gantry Core
//!
//! Core types shared between the queue client and the worker:
//! - Domain types: tasks, claims, run records, cancellation messages
//! - Worker lifecycle events emitted to log/metric sinks

pub mod domain;
