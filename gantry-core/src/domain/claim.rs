//! Claim and cancellation domain types
//!
//! A claim is the queue's grant of exclusive right to execute one run
//! of one task. Cancellation messages reference a run by (taskId, runId)
//! and carry the resolution reason.

use serde::{Deserialize, Serialize};

use crate::domain::task::Task;

/// A claimed unit of work handed to the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    /// Current status of the task on the queue
    pub status: TaskStatus,

    /// The run this claim grants
    pub run_id: u32,

    /// The task definition
    pub task: Task,
}

impl Claim {
    /// Task identifier of the claimed task
    pub fn task_id(&self) -> &str {
        &self.status.task_id
    }
}

/// Queue-side status of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub task_id: String,

    /// Prior and current runs, indexed by run id
    #[serde(default)]
    pub runs: Vec<RunInfo>,
}

/// One numbered attempt at executing a task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Why the run was resolved, if it has been
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_resolved: Option<String>,
}

/// Message delivered when a run is resolved out from under the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelMessage {
    pub payload: CancelPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPayload {
    pub run_id: u32,
    pub status: TaskStatus,
}

impl CancelMessage {
    /// The resolution reason for the referenced run, if present
    pub fn reason_resolved(&self) -> Option<&str> {
        self.payload
            .status
            .runs
            .get(self.payload.run_id as usize)
            .and_then(|run| run.reason_resolved.as_deref())
    }
}
