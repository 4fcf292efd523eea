//! Worker lifecycle events
//!
//! Emitted to the injected monitor at well-defined points of the worker
//! lifecycle. Serialized with an `eventType` discriminator for log sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A lifecycle event emitted by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum WorkerEvent {
    /// Task entered the queue (timestamped at task creation)
    #[serde(rename_all = "camelCase")]
    TaskQueue {
        task_id: String,
        run_id: u32,
        timestamp: DateTime<Utc>,
    },

    /// Handler execution is about to begin
    #[serde(rename_all = "camelCase")]
    TaskStart { task_id: String, run_id: u32 },

    /// Handler execution ended, on every exit path
    #[serde(rename_all = "camelCase")]
    TaskFinish {
        task_id: String,
        run_id: u32,
        success: bool,
    },

    /// Host instance booted (timestamped at boot, not at worker start)
    #[serde(rename_all = "camelCase")]
    InstanceBoot { timestamp: DateTime<Utc> },

    /// Worker finished initialization and is polling
    WorkerReady,

    /// Worker is shutting the instance down
    InstanceShutdown,

    /// Worker process is exiting
    Exit,
}
