//! Collaborator services for the worker
//!
//! Each collaborator is a trait so the poll loop can be exercised with
//! mocks, plus one host-backed implementation:
//! - Devices: leasable exclusive host resources (CPU pins, loop devices)
//! - Disk: free-space pressure probe for the work volume
//! - GC: container/volume reclamation between poll cycles
//! - Volumes: purgeable task volume caches
//! - Host: uptime and final shutdown
//! - Lifecycle: external shutdown intent (spot notices, signals, idle)
//! - Handler: opaque per-task execution controller

pub mod devices;
pub mod disk;
pub mod gc;
pub mod handler;
pub mod host;
pub mod lifecycle;
pub mod volumes;
