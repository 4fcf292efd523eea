//! Task domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Task definition as stored by the queue service
///
/// Structure shared between the queue (persists) and the worker (executes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// When the task was created on the queue
    pub created: DateTime<Utc>,

    /// Worker-interpreted execution payload
    #[serde(default)]
    pub payload: TaskPayload,
}

/// Execution payload of a task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    /// Container image to execute in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Command to run inside the execution environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Host capabilities the task requires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

/// Host capabilities requested by a task
///
/// Device kinds are an open set; each entry requests one leasable
/// device of that kind with kind-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub devices: HashMap<String, serde_json::Value>,
}
